use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use crc32fast::Hasher as Crc32Hasher;
use log::{info, debug};

use super::{
    entities::*,
    value_objects::*,
    repositories::*,
    errors::*,
};

/// Service for appending to and reading from topic logs
pub struct MessageService {
    topic_repo: Arc<dyn TopicRepository>,
}

impl MessageService {
    pub fn new(topic_repo: Arc<dyn TopicRepository>) -> Self {
        Self { topic_repo }
    }

    /// Create a new topic
    pub async fn create_topic(
        &self,
        topic_name: TopicName,
        partitions: u32,
    ) -> std::result::Result<(), TransportError> {
        if self.topic_repo.exists(&topic_name).await? {
            return Err(DomainError::TopicAlreadyExists(topic_name).into());
        }

        match self.topic_repo.create(Topic::new(topic_name.clone(), partitions)).await {
            Ok(()) => {}
            Err(RepositoryError::AlreadyExists(_)) => {
                return Err(DomainError::TopicAlreadyExists(topic_name).into())
            }
            Err(e) => return Err(e.into()),
        }

        info!("Created topic {} with {} partition(s)", topic_name, partitions.max(1));
        Ok(())
    }

    /// Return the partition count of a topic, creating it if it doesn't exist
    pub async fn ensure_topic(
        &self,
        topic_name: &TopicName,
        default_partitions: u32,
    ) -> std::result::Result<u32, RepositoryError> {
        if let Some(count) = self.topic_repo.partition_count(topic_name).await? {
            return Ok(count);
        }

        info!("Creating new topic: {}", topic_name);
        match self
            .topic_repo
            .create(Topic::new(topic_name.clone(), default_partitions))
            .await
        {
            Ok(()) | Err(RepositoryError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        self.topic_repo
            .partition_count(topic_name)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(topic_name.to_string()))
    }

    /// Append a message to a partition and return its offset
    pub async fn append(
        &self,
        topic_name: &TopicName,
        partition: PartitionId,
        message: Message,
    ) -> std::result::Result<Offset, RepositoryError> {
        debug!(
            "Appending {} byte message to {}:{}",
            message.size(),
            topic_name,
            partition
        );
        self.topic_repo.append(topic_name, partition, message).await
    }

    /// Get messages from a partition starting from a specific offset
    pub async fn get_messages(
        &self,
        topic_name: &TopicName,
        partition: PartitionId,
        from_offset: Offset,
        limit: usize,
    ) -> std::result::Result<Vec<Message>, RepositoryError> {
        let messages = self
            .topic_repo
            .read(topic_name, partition, from_offset, limit)
            .await?;

        if !messages.is_empty() {
            debug!(
                "Retrieved {} messages from {}:{} starting at offset {}",
                messages.len(),
                topic_name,
                partition,
                from_offset
            );
        }
        Ok(messages)
    }

    pub async fn high_watermark(
        &self,
        topic_partition: &TopicPartition,
    ) -> std::result::Result<Offset, RepositoryError> {
        self.topic_repo
            .high_watermark(&topic_partition.topic, topic_partition.partition)
            .await
    }

    /// List all topics
    pub async fn list_topics(&self) -> std::result::Result<Vec<TopicName>, RepositoryError> {
        self.topic_repo.list_names().await
    }
}

/// Service for managing committed group offsets
pub struct OffsetManagementService {
    offset_repo: Arc<dyn OffsetRepository>,
}

impl OffsetManagementService {
    pub fn new(offset_repo: Arc<dyn OffsetRepository>) -> Self {
        Self { offset_repo }
    }

    /// Get the committed offset for a group and topic-partition, if any
    pub async fn get_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> std::result::Result<Option<Offset>, RepositoryError> {
        let offset = self.offset_repo.load_offset(group, topic_partition).await?;

        debug!(
            "Committed offset for group {} on {}: {:?}",
            group, topic_partition, offset
        );
        Ok(offset)
    }

    /// Commit the next offset to read for a group and topic-partition
    pub async fn commit_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> std::result::Result<(), RepositoryError> {
        self.offset_repo
            .save_offset(group, topic_partition, offset)
            .await?;

        debug!(
            "Committed offset {} for group {} on {}",
            offset, group, topic_partition
        );
        Ok(())
    }
}

/// Service for routing messages to partitions
#[derive(Default)]
pub struct MessageRoutingService {
    next_unkeyed: AtomicU32,
}

impl MessageRoutingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keyed messages always land on the same partition; unkeyed messages are
    /// spread round-robin.
    pub fn route(&self, key: Option<&str>, partition_count: u32) -> PartitionId {
        let partition_count = partition_count.max(1);
        match key {
            Some(key) => {
                let mut hasher = Crc32Hasher::new();
                hasher.update(key.as_bytes());
                PartitionId(hasher.finalize() % partition_count)
            }
            None => {
                let n = self.next_unkeyed.fetch_add(1, Ordering::Relaxed);
                PartitionId(n % partition_count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_messages_are_sticky() {
        let router = MessageRoutingService::new();
        let first = router.route(Some("user-42"), 8);
        for _ in 0..10 {
            assert_eq!(router.route(Some("user-42"), 8), first);
        }
        assert!(first.value() < 8);
    }

    #[test]
    fn unkeyed_messages_round_robin() {
        let router = MessageRoutingService::new();
        let seen: Vec<u32> = (0..6).map(|_| router.route(None, 3).value()).collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn zero_partitions_is_treated_as_one() {
        let router = MessageRoutingService::new();
        assert_eq!(router.route(Some("k"), 0), PartitionId(0));
    }
}
