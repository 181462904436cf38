use async_trait::async_trait;

use super::{
    entities::*,
    value_objects::*,
    errors::RepositoryError,
};

/// Repository for managing topic logs
#[async_trait]
pub trait TopicRepository: Send + Sync {
    /// Store a new topic; fails with `AlreadyExists` if the name is taken
    async fn create(&self, topic: Topic) -> Result<(), RepositoryError>;
    async fn exists(&self, name: &TopicName) -> Result<bool, RepositoryError>;
    async fn partition_count(&self, name: &TopicName) -> Result<Option<u32>, RepositoryError>;
    async fn list_names(&self) -> Result<Vec<TopicName>, RepositoryError>;

    async fn append(
        &self,
        name: &TopicName,
        partition: PartitionId,
        message: Message,
    ) -> Result<Offset, RepositoryError>;

    async fn read(
        &self,
        name: &TopicName,
        partition: PartitionId,
        from_offset: Offset,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn high_watermark(
        &self,
        name: &TopicName,
        partition: PartitionId,
    ) -> Result<Offset, RepositoryError>;
}

/// Repository for managing committed group offsets
#[async_trait]
pub trait OffsetRepository: Send + Sync {
    async fn save_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), RepositoryError>;

    async fn load_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, RepositoryError>;
}
