use async_trait::async_trait;
use dashmap::DashSet;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::domain::{
    entities::Message,
    errors::{DomainError, TransportError},
    events::RecordAppended,
    repositories::{OffsetRepository, TopicRepository},
    services::{MessageRoutingService, MessageService, OffsetManagementService},
    transport::{Ack, InboundMessage, OutboundMessage, Transport, TransportSubscription},
    value_objects::*,
};
use crate::infrastructure::persistence::{InMemoryOffsetRepository, InMemoryTopicRepository};

const EVENT_BUFFER: usize = 1024;

/// Availability switch and acknowledgement delay shared with subscriptions
struct FaultState {
    available: AtomicBool,
    ack_delay_ms: AtomicU64,
}

impl FaultState {
    fn check(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable(
                "embedded broker is not accepting connections".to_string(),
            ))
        }
    }
}

/// In-process broker implementing [`Transport`].
///
/// Topics are partitioned append-only logs; committed offsets are kept per
/// consumer group. Used by the demo binary and by the test-suite in place of
/// a networked cluster.
pub struct EmbeddedBroker {
    message_service: Arc<MessageService>,
    offset_service: Arc<OffsetManagementService>,
    router: MessageRoutingService,
    default_partitions: u32,
    events: broadcast::Sender<RecordAppended>,
    faults: Arc<FaultState>,
    members: Arc<DashSet<(TopicName, GroupId)>>,
}

impl EmbeddedBroker {
    pub fn new(
        topic_repo: Arc<dyn TopicRepository>,
        offset_repo: Arc<dyn OffsetRepository>,
        default_partitions: u32,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            message_service: Arc::new(MessageService::new(topic_repo)),
            offset_service: Arc::new(OffsetManagementService::new(offset_repo)),
            router: MessageRoutingService::new(),
            default_partitions: default_partitions.max(1),
            events,
            faults: Arc::new(FaultState {
                available: AtomicBool::new(true),
                ack_delay_ms: AtomicU64::new(0),
            }),
            members: Arc::new(DashSet::new()),
        }
    }

    /// Broker backed by in-memory repositories, auto-creating single-partition topics
    pub fn in_memory() -> Self {
        Self::with_partitions(1)
    }

    /// Broker backed by in-memory repositories, auto-creating topics with `partitions`
    pub fn with_partitions(partitions: u32) -> Self {
        Self::new(
            Arc::new(InMemoryTopicRepository::new()),
            Arc::new(InMemoryOffsetRepository::new()),
            partitions,
        )
    }

    pub async fn create_topic(
        &self,
        topic: &TopicName,
        partitions: u32,
    ) -> Result<(), TransportError> {
        self.message_service
            .create_topic(topic.clone(), partitions)
            .await
    }

    pub async fn topics(&self) -> Result<Vec<TopicName>, TransportError> {
        Ok(self.message_service.list_topics().await?)
    }

    /// Simulate the broker going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        info!(
            "Embedded broker marked {}",
            if available { "available" } else { "unavailable" }
        );
        self.faults.available.store(available, Ordering::SeqCst);
    }

    /// Delay every publish acknowledgement by `delay`, saturating at
    /// `u64::MAX` milliseconds
    pub fn set_ack_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.faults.ack_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Whether a subscription of `group` on `topic` is currently open
    pub fn is_member(&self, topic: &TopicName, group: &GroupId) -> bool {
        self.members.contains(&(topic.clone(), group.clone()))
    }

    pub async fn committed_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, TransportError> {
        Ok(self.offset_service.get_offset(group, topic_partition).await?)
    }

    pub async fn high_watermark(
        &self,
        topic_partition: &TopicPartition,
    ) -> Result<Offset, TransportError> {
        Ok(self.message_service.high_watermark(topic_partition).await?)
    }
}

#[async_trait]
impl Transport for EmbeddedBroker {
    async fn publish(
        &self,
        topic: &TopicName,
        message: OutboundMessage,
    ) -> Result<Ack, TransportError> {
        self.faults.check()?;

        let partition_count = self
            .message_service
            .ensure_topic(topic, self.default_partitions)
            .await?;
        let partition = self.router.route(message.key.as_deref(), partition_count);

        let stored = Message::new(message.key, message.value)
            .with_timestamp(message.timestamp)
            .with_headers(message.headers);
        let timestamp = stored.timestamp;
        let offset = self.message_service.append(topic, partition, stored).await?;

        // No receivers just means nobody is subscribed yet.
        let _ = self.events.send(RecordAppended::new(
            TopicPartition::new(topic.clone(), partition),
            offset,
        ));

        let delay = self.faults.ack_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        debug!("Message stored at offset {} in {}:{}", offset, topic, partition);
        Ok(Ack {
            topic: topic.clone(),
            partition,
            offset,
            timestamp,
        })
    }

    async fn subscribe(
        &self,
        topic: &TopicName,
        group: &GroupId,
        reset: OffsetReset,
    ) -> Result<Box<dyn TransportSubscription>, TransportError> {
        self.faults.check()?;

        // One open subscription per (topic, group); the guard releases the
        // slot if anything below fails.
        let key = (topic.clone(), group.clone());
        if !self.members.insert(key.clone()) {
            return Err(TransportError::AlreadySubscribed {
                topic: topic.clone(),
                group: group.clone(),
            });
        }
        let membership = Membership {
            members: self.members.clone(),
            key,
        };

        // Subscribe to events before reading positions so nothing appended
        // in between is missed.
        let events = self.events.subscribe();
        let partition_count = self
            .message_service
            .ensure_topic(topic, self.default_partitions)
            .await?;

        let mut positions = BTreeMap::new();
        for id in 0..partition_count {
            let tp = TopicPartition::new(topic.clone(), PartitionId(id));
            let start = match self.offset_service.get_offset(group, &tp).await? {
                Some(committed) => committed,
                None => match reset {
                    OffsetReset::Earliest => Offset::new(0),
                    OffsetReset::Latest => self.message_service.high_watermark(&tp).await?,
                    OffsetReset::None => {
                        return Err(DomainError::NoCommittedOffset(group.clone(), tp).into())
                    }
                },
            };
            positions.insert(PartitionId(id), start);
        }

        info!(
            "Group {} subscribed to {} ({} partition(s), reset={})",
            group, topic, partition_count, reset
        );

        Ok(Box::new(EmbeddedSubscription {
            topic: topic.clone(),
            group: group.clone(),
            positions,
            message_service: self.message_service.clone(),
            offset_service: self.offset_service.clone(),
            faults: self.faults.clone(),
            events,
            membership: Some(membership),
        }))
    }
}

/// Holds a (topic, group) slot until closed or dropped
struct Membership {
    members: Arc<DashSet<(TopicName, GroupId)>>,
    key: (TopicName, GroupId),
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.members.remove(&self.key);
    }
}

struct EmbeddedSubscription {
    topic: TopicName,
    group: GroupId,
    positions: BTreeMap<PartitionId, Offset>,
    message_service: Arc<MessageService>,
    offset_service: Arc<OffsetManagementService>,
    faults: Arc<FaultState>,
    events: broadcast::Receiver<RecordAppended>,
    membership: Option<Membership>,
}

impl EmbeddedSubscription {
    /// Read what is available from every partition without advancing
    /// positions until the whole batch is assembled.
    async fn fetch_ready(&self, max_records: usize) -> Result<Vec<InboundMessage>, TransportError> {
        let mut batch = Vec::new();
        for (&partition, &position) in &self.positions {
            let room = max_records.saturating_sub(batch.len());
            if room == 0 {
                break;
            }
            let messages = self
                .message_service
                .get_messages(&self.topic, partition, position, room)
                .await?;
            batch.extend(messages.into_iter().map(|m| InboundMessage {
                topic: self.topic.clone(),
                partition,
                offset: m.offset.unwrap_or(position),
                key: m.key,
                value: m.value,
                headers: m.headers,
                timestamp: m.timestamp,
            }));
        }
        Ok(batch)
    }

    /// Wait for an append this subscription has not read yet. Returns `false`
    /// once `deadline` passes.
    async fn wait_for_append(&mut self, deadline: Instant) -> Result<bool, TransportError> {
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => return Ok(false),
                Ok(Ok(appended)) => {
                    let position = self.positions.get(&appended.topic_partition.partition).copied();
                    if appended.is_visible_to(&self.topic, position) {
                        return Ok(true);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    // Missed events may include ours; re-read the logs.
                    debug!("Subscription on {} skipped {} broker events", self.topic, skipped);
                    return Ok(true);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(TransportError::Unavailable(
                        "embedded broker shut down".to_string(),
                    ))
                }
            }
        }
    }

    fn partition_known(&self, partition: PartitionId) -> Result<(), TransportError> {
        if self.positions.contains_key(&partition) {
            Ok(())
        } else {
            Err(DomainError::PartitionNotFound(partition.value()).into())
        }
    }
}

#[async_trait]
impl TransportSubscription for EmbeddedSubscription {
    async fn poll(
        &mut self,
        max_records: usize,
        max_wait: Duration,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        let deadline = Instant::now() + max_wait;
        loop {
            self.faults.check()?;

            let batch = self.fetch_ready(max_records.max(1)).await?;
            if !batch.is_empty() {
                for message in &batch {
                    self.positions.insert(message.partition, message.offset.next());
                }
                return Ok(batch);
            }

            if !self.wait_for_append(deadline).await? {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(
        &mut self,
        partition: PartitionId,
        next_offset: Offset,
    ) -> Result<(), TransportError> {
        self.faults.check()?;
        self.partition_known(partition)?;
        let tp = TopicPartition::new(self.topic.clone(), partition);
        self.offset_service
            .commit_offset(&self.group, &tp, next_offset)
            .await?;
        Ok(())
    }

    async fn seek(&mut self, partition: PartitionId, offset: Offset) -> Result<(), TransportError> {
        self.partition_known(partition)?;
        debug!(
            "Group {} seeking {}:{} to offset {}",
            self.group, self.topic, partition, offset
        );
        self.positions.insert(partition, offset);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.faults.check() {
            warn!("Closing subscription on {} while broker is down: {}", self.topic, e);
        }
        if self.membership.take().is_some() {
            info!("Group {} left {}", self.group, self.topic);
        }
        Ok(())
    }
}
