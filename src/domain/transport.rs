//! The boundary to a broker client. Anything that can publish bytes to a
//! topic and hand them back to a consumer group satisfies it, whether a real
//! network client or the in-process [`EmbeddedBroker`](crate::infrastructure::embedded::EmbeddedBroker).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use super::{
    errors::TransportError,
    value_objects::*,
};

/// A record handed to the transport for delivery
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub key: Option<String>,
    pub value: Bytes,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(key: Option<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
            headers: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Broker acknowledgement of a published record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: DateTime<Utc>,
}

/// A record read back from the broker
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub key: Option<String>,
    pub value: Bytes,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Append one record to `topic`, resolving once the broker has assigned it
    /// a partition and offset.
    async fn publish(
        &self,
        topic: &TopicName,
        message: OutboundMessage,
    ) -> Result<Ack, TransportError>;

    /// Join `group` on `topic`. The subscription starts at the group's
    /// committed offsets, or per `reset` where none exist.
    ///
    /// Only one subscription per (topic, group) may be open at a time; it is
    /// released by `close` or by dropping it.
    async fn subscribe(
        &self,
        topic: &TopicName,
        group: &GroupId,
        reset: OffsetReset,
    ) -> Result<Box<dyn TransportSubscription>, TransportError>;
}

/// A pull cursor over the partitions of one topic for one group
#[async_trait]
pub trait TransportSubscription: Send {
    /// Return up to `max_records` records, in offset order within each
    /// partition. Yields an empty batch if nothing arrives within `max_wait`.
    async fn poll(
        &mut self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    /// Commit `next_offset` as the group's read position for `partition`
    async fn commit(
        &mut self,
        partition: PartitionId,
        next_offset: Offset,
    ) -> Result<(), TransportError>;

    /// Move this subscription's read position so `offset` is returned again
    async fn seek(&mut self, partition: PartitionId, offset: Offset) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
