use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::value_objects::*;

pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("Invalid group id: {0}")]
    InvalidGroupId(String),

    #[error("Invalid offset reset policy '{0}' (expected earliest, latest or none)")]
    InvalidOffsetReset(String),

    #[error("Partition {0} does not exist")]
    PartitionNotFound(u32),

    #[error("Topic '{0}' already exists")]
    TopicAlreadyExists(TopicName),

    #[error("Group '{0}' has no committed offset for {1} and offset reset is 'none'")]
    NoCommittedOffset(GroupId, TopicPartition),
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

/// Failures reported by a transport client
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Group '{group}' already has an open subscription on '{topic}'")]
    AlreadySubscribed { topic: TopicName, group: GroupId },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Error returned by a record handler. The record is not acknowledged and
/// will be delivered again.
#[derive(Debug)]
pub struct HandlerError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors surfaced by the publish/subscribe pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("No acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error("Topic '{topic}' already has an active subscription for group '{group}'")]
    AlreadySubscribed { topic: TopicName, group: GroupId },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<TransportError> for PipelineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(reason) => PipelineError::TransportUnavailable(reason),
            TransportError::AlreadySubscribed { topic, group } => {
                PipelineError::AlreadySubscribed { topic, group }
            }
            TransportError::Domain(e) => PipelineError::Domain(e),
            TransportError::Repository(e) => PipelineError::Repository(e),
        }
    }
}
