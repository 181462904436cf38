use std::sync::Arc;
use dashmap::DashMap;
use async_trait::async_trait;

use crate::domain::{
    entities::{Message, Topic},
    value_objects::*,
    repositories::*,
    errors::RepositoryError,
};

/// In-memory implementation of the TopicRepository
pub struct InMemoryTopicRepository {
    topics: Arc<DashMap<TopicName, Topic>>,
}

impl InMemoryTopicRepository {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryTopicRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn partition_not_found(name: &TopicName, partition: PartitionId) -> RepositoryError {
    RepositoryError::NotFound(format!("{}:{}", name, partition))
}

#[async_trait]
impl TopicRepository for InMemoryTopicRepository {
    async fn create(&self, topic: Topic) -> Result<(), RepositoryError> {
        match self.topics.entry(topic.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RepositoryError::AlreadyExists(topic.name.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(topic);
                Ok(())
            }
        }
    }

    async fn exists(&self, name: &TopicName) -> Result<bool, RepositoryError> {
        Ok(self.topics.contains_key(name))
    }

    async fn partition_count(&self, name: &TopicName) -> Result<Option<u32>, RepositoryError> {
        Ok(self.topics.get(name).map(|entry| entry.partition_count()))
    }

    async fn list_names(&self) -> Result<Vec<TopicName>, RepositoryError> {
        Ok(self.topics.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn append(
        &self,
        name: &TopicName,
        partition: PartitionId,
        message: Message,
    ) -> Result<Offset, RepositoryError> {
        let mut topic = self
            .topics
            .get_mut(name)
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;
        topic
            .append(partition, message)
            .map_err(|_| partition_not_found(name, partition))
    }

    async fn read(
        &self,
        name: &TopicName,
        partition: PartitionId,
        from_offset: Offset,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let topic = self
            .topics
            .get(name)
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;
        let partition = topic
            .get_partition(partition)
            .ok_or_else(|| partition_not_found(name, partition))?;
        Ok(partition
            .get_messages(from_offset, limit)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn high_watermark(
        &self,
        name: &TopicName,
        partition: PartitionId,
    ) -> Result<Offset, RepositoryError> {
        let topic = self
            .topics
            .get(name)
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;
        topic
            .get_partition(partition)
            .map(|p| p.get_high_watermark())
            .ok_or_else(|| partition_not_found(name, partition))
    }
}

/// In-memory implementation of the OffsetRepository
pub struct InMemoryOffsetRepository {
    offsets: Arc<DashMap<(GroupId, TopicPartition), Offset>>,
}

impl InMemoryOffsetRepository {
    pub fn new() -> Self {
        Self {
            offsets: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryOffsetRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OffsetRepository for InMemoryOffsetRepository {
    async fn save_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), RepositoryError> {
        let key = (group.clone(), topic_partition.clone());
        self.offsets.insert(key, offset);
        Ok(())
    }

    async fn load_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, RepositoryError> {
        let key = (group.clone(), topic_partition.clone());
        Ok(self.offsets.get(&key).map(|entry| *entry.value()))
    }
}
