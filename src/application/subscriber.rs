use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::application::codec::{Codec, JsonCodec};
use crate::domain::{
    entities::{DeliveryRecord, Envelope},
    errors::{HandlerError, PipelineError},
    transport::{InboundMessage, OutboundMessage, Transport, TransportSubscription},
    value_objects::*,
};

pub const DLT_ORIGINAL_TOPIC: &str = "dlt-original-topic";
pub const DLT_ORIGINAL_PARTITION: &str = "dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET: &str = "dlt-original-offset";
pub const DLT_EXCEPTION_MESSAGE: &str = "dlt-exception-message";

/// What to do with a record whose bytes cannot be decoded
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeserializationPolicy {
    /// Log a warning, count it, and commit past the record
    #[default]
    SkipAndLog,
    /// Republish the raw bytes to a dead-letter topic, then commit past the
    /// record. `None` means `<topic>.DLT`.
    DeadLetter { topic: Option<TopicName> },
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub group_id: GroupId,
    pub auto_offset_reset: OffsetReset,
    pub max_poll_records: usize,
    pub poll_timeout: Duration,
    /// How long `stop` waits for an in-flight handler before aborting
    pub shutdown_grace: Duration,
    /// Pause before a record rejected by the handler is delivered again
    pub redelivery_backoff: Duration,
    pub deserialization_policy: DeserializationPolicy,
    pub log_target: String,
}

impl SubscriberConfig {
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            auto_offset_reset: OffsetReset::Earliest,
            max_poll_records: 500,
            poll_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            redelivery_backoff: Duration::from_millis(100),
            deserialization_policy: DeserializationPolicy::SkipAndLog,
            log_target: "kafka_pubsub::subscriber".to_string(),
        }
    }
}

/// Lifecycle of a subscription. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Created,
    Subscribed,
    Running,
    Stopped,
}

/// Per-subscription counters
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    delivered: AtomicU64,
    deserialization_failures: AtomicU64,
    dead_lettered: AtomicU64,
    handler_failures: AtomicU64,
}

impl SubscriptionStats {
    /// Records the handler accepted
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn deserialization_failures(&self) -> u64 {
        self.deserialization_failures.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Handler rejections; each one leads to a redelivery
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }
}

/// Receives decoded records.
///
/// A record is committed only after `handle` returns `Ok`. On `Err` it is
/// delivered again, so handlers must tolerate duplicates.
pub trait RecordHandler<T>: Send + Sync {
    fn handle(&self, record: DeliveryRecord<T>) -> Result<(), HandlerError>;
}

impl<T, F> RecordHandler<T> for F
where
    F: Fn(DeliveryRecord<T>) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, record: DeliveryRecord<T>) -> Result<(), HandlerError> {
        self(record)
    }
}

/// Decodes records from a topic and dispatches them to a handler
pub struct Subscriber<T, C = JsonCodec<T>> {
    transport: Arc<dyn Transport>,
    codec: Arc<C>,
    config: SubscriberConfig,
    _payload: PhantomData<fn() -> T>,
}

impl<T, C> Subscriber<T, C>
where
    T: Send + 'static,
    C: Codec<T> + 'static,
{
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<C>, config: SubscriberConfig) -> Self {
        Self {
            transport,
            codec,
            config,
            _payload: PhantomData,
        }
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Subscribe to `topic` with the configured group
    pub async fn subscribe<H>(
        &self,
        topic: TopicName,
        handler: H,
    ) -> Result<SubscriptionHandle, PipelineError>
    where
        H: RecordHandler<T> + 'static,
    {
        self.subscribe_as(topic, self.config.group_id.clone(), handler)
            .await
    }

    /// Subscribe to `topic` as `group`.
    ///
    /// The transport allows one open subscription per (topic, group), so a
    /// second one from any subscriber sharing the transport fails with
    /// [`PipelineError::AlreadySubscribed`] until the first is stopped.
    pub async fn subscribe_as<H>(
        &self,
        topic: TopicName,
        group: GroupId,
        handler: H,
    ) -> Result<SubscriptionHandle, PipelineError>
    where
        H: RecordHandler<T> + 'static,
    {
        let state = Arc::new(watch::channel(SubscriptionState::Created).0);
        let subscription = self
            .transport
            .subscribe(&topic, &group, self.config.auto_offset_reset)
            .await
            .map_err(|e| {
                error!(
                    target: self.config.log_target.as_str(),
                    "Group {} could not subscribe to {}: {}", group, topic, e
                );
                PipelineError::from(e)
            })?;
        state.send_replace(SubscriptionState::Subscribed);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(SubscriptionStats::default());
        let worker = SubscriptionLoop {
            topic: topic.clone(),
            group: group.clone(),
            subscription,
            transport: self.transport.clone(),
            codec: self.codec.clone(),
            handler,
            config: self.config.clone(),
            stats: stats.clone(),
            state: state.clone(),
            shutdown: shutdown_rx,
            _payload: PhantomData,
        };
        let task = tokio::spawn(worker.run());

        Ok(SubscriptionHandle {
            topic,
            group,
            state,
            shutdown,
            task: Mutex::new(Some(task)),
            stats,
            shutdown_grace: self.config.shutdown_grace,
            log_target: self.config.log_target.clone(),
        })
    }
}

/// Controls a running subscription. Dropping the handle also stops the loop,
/// without waiting for it.
pub struct SubscriptionHandle {
    topic: TopicName,
    group: GroupId,
    state: Arc<watch::Sender<SubscriptionState>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<SubscriptionStats>,
    shutdown_grace: Duration,
    log_target: String,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn group_id(&self) -> &GroupId {
        &self.group
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Wait until the loop is polling. Returns `false` on timeout or if the
    /// subscription stopped first.
    pub async fn wait_until_running(&self, timeout: Duration) -> bool {
        let mut state = self.state.subscribe();
        let running = async {
            state
                .wait_for(|s| matches!(s, SubscriptionState::Running | SubscriptionState::Stopped))
                .await
                .map(|s| *s == SubscriptionState::Running)
                .unwrap_or(false)
        };
        tokio::time::timeout(timeout, running).await.unwrap_or(false)
    }

    /// Stop delivering, let an in-flight handler finish, then release the
    /// transport subscription. Aborts the loop if it has not finished within
    /// the shutdown grace period. Calling `stop` again is a no-op.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(mut running) = task.take() else {
            return;
        };

        info!(
            target: self.log_target.as_str(),
            "Stopping subscription of group {} on {}", self.group, self.topic
        );
        // The loop may already have exited; nothing to signal then.
        let _ = self.shutdown.send(true);

        match tokio::time::timeout(self.shutdown_grace, &mut running).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                target: self.log_target.as_str(),
                "Subscription loop on {} ended abnormally: {}", self.topic, e
            ),
            Err(_) => {
                warn!(
                    target: self.log_target.as_str(),
                    "Subscription on {} did not drain within {:?}, aborting",
                    self.topic, self.shutdown_grace
                );
                running.abort();
                let _ = running.await;
            }
        }
        self.state.send_replace(SubscriptionState::Stopped);
    }
}

struct SubscriptionLoop<T, C, H> {
    topic: TopicName,
    group: GroupId,
    subscription: Box<dyn TransportSubscription>,
    transport: Arc<dyn Transport>,
    codec: Arc<C>,
    handler: H,
    config: SubscriberConfig,
    stats: Arc<SubscriptionStats>,
    state: Arc<watch::Sender<SubscriptionState>>,
    shutdown: watch::Receiver<bool>,
    _payload: PhantomData<fn() -> T>,
}

/// Outcome of processing one record
enum Disposition {
    Commit,
    Redeliver,
}

impl<T, C, H> SubscriptionLoop<T, C, H>
where
    T: Send + 'static,
    C: Codec<T> + 'static,
    H: RecordHandler<T> + 'static,
{
    fn target(&self) -> &str {
        self.config.log_target.as_str()
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Sleep for `delay` unless shutdown is requested first. Returns whether
    /// to stop.
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => self.stopping(),
            _ = self.shutdown.changed() => true,
        }
    }

    async fn run(mut self) {
        self.state.send_replace(SubscriptionState::Running);
        info!(
            target: self.target(),
            "Group {} consuming {}", self.group, self.topic
        );

        'poll: while !self.stopping() {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break 'poll,
                polled = self.subscription.poll(self.config.max_poll_records, self.config.poll_timeout) => polled,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(target: self.target(), "Poll on {} failed: {}", self.topic, e);
                    if self.pause(self.config.redelivery_backoff).await {
                        break 'poll;
                    }
                    continue;
                }
            };
            if !batch.is_empty() {
                debug!(target: self.target(), "Polled {} record(s) from {}", batch.len(), self.topic);
            }

            // Once a record in a partition is sent back for redelivery, later
            // records in that partition wait for it.
            let mut rewound: HashSet<PartitionId> = HashSet::new();
            for message in batch {
                if rewound.contains(&message.partition) {
                    continue;
                }
                if self.stopping() {
                    break 'poll;
                }

                let partition = message.partition;
                let offset = message.offset;
                match self.process(message).await {
                    Disposition::Commit => {
                        if let Err(e) = self.subscription.commit(partition, offset.next()).await {
                            warn!(
                                target: self.target(),
                                "Commit of {}:{}@{} failed, record may be delivered again: {}",
                                self.topic, partition, offset, e
                            );
                        }
                    }
                    Disposition::Redeliver => {
                        if let Err(e) = self.subscription.seek(partition, offset).await {
                            error!(
                                target: self.target(),
                                "Cannot rewind {}:{} to {}: {}", self.topic, partition, offset, e
                            );
                        }
                        rewound.insert(partition);
                    }
                }
            }

            if !rewound.is_empty() && self.pause(self.config.redelivery_backoff).await {
                break 'poll;
            }
        }

        if let Err(e) = self.subscription.close().await {
            warn!(target: self.target(), "Closing subscription on {} failed: {}", self.topic, e);
        }
        self.state.send_replace(SubscriptionState::Stopped);
        info!(
            target: self.target(),
            "Group {} stopped consuming {}", self.group, self.topic
        );
    }

    async fn process(&mut self, message: InboundMessage) -> Disposition {
        let payload = match self.codec.decode(&message.value) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats
                    .deserialization_failures
                    .fetch_add(1, Ordering::Relaxed);
                return self.undecodable(message, e).await;
            }
        };

        let mut envelope = Envelope::new(payload)
            .with_timestamp(message.timestamp)
            .with_headers(message.headers);
        if let Some(key) = message.key {
            envelope = envelope.with_key(key);
        }
        let record = DeliveryRecord::new(envelope, message.topic, message.partition, message.offset);

        match self.handler.handle(record) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                Disposition::Commit
            }
            Err(e) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: self.target(),
                    "Handler rejected {}:{}@{}, will redeliver: {}",
                    self.topic, message.partition, message.offset, e
                );
                Disposition::Redeliver
            }
        }
    }

    async fn undecodable(&mut self, message: InboundMessage, err: PipelineError) -> Disposition {
        let dead_letter_topic = match &self.config.deserialization_policy {
            DeserializationPolicy::SkipAndLog => {
                warn!(
                    target: self.target(),
                    "Skipping undecodable record {}:{}@{}: {}",
                    message.topic, message.partition, message.offset, err
                );
                return Disposition::Commit;
            }
            DeserializationPolicy::DeadLetter { topic } => topic
                .clone()
                .unwrap_or_else(|| message.topic.dead_letter()),
        };

        let mut headers: HashMap<String, String> = message.headers.clone();
        headers.insert(DLT_ORIGINAL_TOPIC.to_string(), message.topic.to_string());
        headers.insert(DLT_ORIGINAL_PARTITION.to_string(), message.partition.to_string());
        headers.insert(DLT_ORIGINAL_OFFSET.to_string(), message.offset.to_string());
        headers.insert(DLT_EXCEPTION_MESSAGE.to_string(), err.to_string());
        let dead_letter = OutboundMessage::new(message.key.clone(), message.value.clone())
            .with_headers(headers)
            .with_timestamp(message.timestamp);

        match self.transport.publish(&dead_letter_topic, dead_letter).await {
            Ok(ack) => {
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: self.target(),
                    "Undecodable record {}:{}@{} moved to {}:{}@{}: {}",
                    message.topic, message.partition, message.offset,
                    ack.topic, ack.partition, ack.offset, err
                );
                Disposition::Commit
            }
            Err(e) => {
                error!(
                    target: self.target(),
                    "Cannot dead-letter {}:{}@{} to {}, will retry: {}",
                    message.topic, message.partition, message.offset, dead_letter_topic, e
                );
                Disposition::Redeliver
            }
        }
    }
}
