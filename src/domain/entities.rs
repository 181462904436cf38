use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::value_objects::*;

/// Current time at the millisecond precision carried on the wire
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Reference payload exchanged between the publisher and the subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub lastname: String,
    /// Stamped with the decode time when absent from the wire
    #[serde(rename = "date", default = "now_millis")]
    pub created_at: DateTime<Utc>,
}

impl Person {
    /// Create a person stamped with the current time
    pub fn new(name: impl Into<String>, lastname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lastname: lastname.into(),
            created_at: now_millis(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Person[name={}, lastname={}]", self.name, self.lastname)
    }
}

/// The logical message unit: routing key, payload and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    key: Option<String>,
    payload: T,
    timestamp: DateTime<Utc>,
    headers: HashMap<String, String>,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            key: None,
            payload,
            timestamp: now_millis(),
            headers: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// A decoded envelope together with the transport position it was read from
#[derive(Debug, Clone)]
pub struct DeliveryRecord<T> {
    envelope: Envelope<T>,
    topic: TopicName,
    partition: PartitionId,
    offset: Offset,
    received_at: DateTime<Utc>,
}

impl<T> DeliveryRecord<T> {
    pub fn new(
        envelope: Envelope<T>,
        topic: TopicName,
        partition: PartitionId,
        offset: Offset,
    ) -> Self {
        Self {
            envelope,
            topic,
            partition,
            offset,
            received_at: Utc::now(),
        }
    }

    pub fn envelope(&self) -> &Envelope<T> {
        &self.envelope
    }

    pub fn payload(&self) -> &T {
        self.envelope.payload()
    }

    pub fn key(&self) -> Option<&str> {
        self.envelope.key()
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn offset(&self) -> Offset {
        self.offset
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn into_envelope(self) -> Envelope<T> {
        self.envelope
    }
}

/// A topic represents a named, partitioned log of messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub name: TopicName,
    pub partitions: Vec<Partition>,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    /// Create a new topic with `partition_count` partitions (at least one)
    pub fn new(name: TopicName, partition_count: u32) -> Self {
        let partitions = (0..partition_count.max(1))
            .map(|id| Partition::new(PartitionId(id)))
            .collect();
        Self {
            name,
            partitions,
            created_at: Utc::now(),
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Append a message to the given partition
    pub fn append(
        &mut self,
        partition_id: PartitionId,
        message: Message,
    ) -> crate::domain::errors::Result<Offset> {
        self.get_partition_mut(partition_id)
            .map(|partition| partition.append_message(message))
            .ok_or(crate::domain::errors::DomainError::PartitionNotFound(
                partition_id.value(),
            ))
    }

    /// Get a specific partition by ID
    pub fn get_partition(&self, partition_id: PartitionId) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == partition_id)
    }

    fn get_partition_mut(&mut self, partition_id: PartitionId) -> Option<&mut Partition> {
        self.partitions.iter_mut().find(|p| p.id == partition_id)
    }
}

/// A partition is an ordered, immutable sequence of messages within a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub messages: Vec<Message>,
    pub high_watermark: Offset,
}

impl Partition {
    /// Create a new empty partition
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            high_watermark: Offset::new(0),
        }
    }

    /// Append a message to the partition and return its offset
    pub fn append_message(&mut self, mut message: Message) -> Offset {
        let offset = self.high_watermark;
        message.offset = Some(offset);
        self.messages.push(message);
        self.high_watermark = offset.next();
        offset
    }

    /// Get messages starting from the specified offset
    pub fn get_messages(&self, from_offset: Offset, limit: usize) -> Vec<&Message> {
        let start_idx = from_offset.value() as usize;
        self.messages.iter().skip(start_idx).take(limit).collect()
    }

    /// Offset the next appended message will receive
    pub fn get_high_watermark(&self) -> Offset {
        self.high_watermark
    }
}

/// A stored log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub key: Option<String>,
    pub value: Bytes,
    pub timestamp: DateTime<Utc>,
    pub offset: Option<Offset>,
    pub headers: HashMap<String, String>,
}

impl Message {
    /// Create a new message
    pub fn new(key: Option<String>, value: Bytes) -> Self {
        Self {
            id: MessageId::new(),
            key,
            value,
            timestamp: Utc::now(),
            offset: None,
            headers: HashMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Get the size of the message in bytes
    pub fn size(&self) -> usize {
        self.value.len()
            + self.key.as_ref().map(|k| k.len()).unwrap_or(0)
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}
