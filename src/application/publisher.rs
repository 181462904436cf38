use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::application::codec::{Codec, JsonCodec};
use crate::domain::{
    entities::Envelope,
    errors::PipelineError,
    transport::{OutboundMessage, Transport},
    value_objects::*,
};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Topic used by [`Publisher::send_default`]
    pub default_topic: Option<TopicName>,
    /// How long to wait for the broker to acknowledge each send
    pub send_timeout: Duration,
    pub log_target: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            default_topic: None,
            send_timeout: Duration::from_secs(5),
            log_target: "kafka_pubsub::publisher".to_string(),
        }
    }
}

/// Where the broker put a published envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub topic: TopicName,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: DateTime<Utc>,
}

type DeliveryReply = oneshot::Sender<Result<DeliveryResult, PipelineError>>;

struct SendRequest {
    topic: TopicName,
    message: OutboundMessage,
    reply: DeliveryReply,
}

/// Resolves once the broker acknowledges (or rejects) a single send
#[must_use = "the delivery outcome is only observable by awaiting the future"]
pub struct DeliveryFuture {
    rx: oneshot::Receiver<Result<DeliveryResult, PipelineError>>,
}

impl Future for DeliveryFuture {
    type Output = Result<DeliveryResult, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(PipelineError::TransportUnavailable(
                    "publisher stopped before the send completed".to_string(),
                ))
            })
        })
    }
}

/// Serializes envelopes and hands them to the transport.
///
/// Each topic gets its own send lane: sends to one topic reach the broker in
/// the order `send` was called, while a slow acknowledgement on one topic
/// does not hold back sends to others. No retries are made here.
pub struct Publisher<T, C = JsonCodec<T>> {
    codec: Arc<C>,
    queue: mpsc::UnboundedSender<SendRequest>,
    in_flight: Arc<watch::Sender<usize>>,
    worker: JoinHandle<()>,
    config: PublisherConfig,
    _payload: PhantomData<fn(T)>,
}

impl<T, C> Publisher<T, C>
where
    C: Codec<T>,
{
    /// Build a publisher and start its send worker. Must be called from
    /// within a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, codec: Arc<C>, config: PublisherConfig) -> Self {
        let (queue, requests) = mpsc::unbounded_channel();
        let in_flight = Arc::new(watch::channel(0usize).0);
        let worker = tokio::spawn(run_sender(
            transport,
            requests,
            in_flight.clone(),
            config.send_timeout,
            config.log_target.clone(),
        ));

        Self {
            codec,
            queue,
            in_flight,
            worker,
            config,
            _payload: PhantomData,
        }
    }

    /// Serialize `envelope` and queue it for `topic`.
    ///
    /// Serialization failures are returned immediately and nothing is sent.
    pub fn send(
        &self,
        topic: &TopicName,
        envelope: Envelope<T>,
    ) -> Result<DeliveryFuture, PipelineError> {
        let value = self.codec.encode(envelope.payload()).map_err(|e| {
            error!(target: self.config.log_target.as_str(), "Cannot serialize message for {}: {}", topic, e);
            e
        })?;

        let message = OutboundMessage::new(envelope.key().map(str::to_string), value)
            .with_headers(envelope.headers().clone())
            .with_timestamp(envelope.timestamp());

        let (reply, rx) = oneshot::channel();
        self.in_flight.send_modify(|n| *n += 1);
        let request = SendRequest {
            topic: topic.clone(),
            message,
            reply,
        };
        if let Err(mpsc::error::SendError(request)) = self.queue.send(request) {
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            let _ = request.reply.send(Err(PipelineError::TransportUnavailable(
                "publisher worker is not running".to_string(),
            )));
        }

        debug!(target: self.config.log_target.as_str(), "Queued message for {}", topic);
        Ok(DeliveryFuture { rx })
    }

    /// Send to the configured default topic
    pub fn send_default(&self, envelope: Envelope<T>) -> Result<DeliveryFuture, PipelineError> {
        let topic = self.config.default_topic.clone().ok_or_else(|| {
            PipelineError::InvalidConfig("publisher has no default topic".to_string())
        })?;
        self.send(&topic, envelope)
    }

    /// Number of sends queued or awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until every queued send has completed. Returns `false` on timeout.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let mut pending = self.in_flight.subscribe();
        let drained = async { pending.wait_for(|n| *n == 0).await.is_ok() };
        tokio::time::timeout(timeout, drained).await.unwrap_or(false)
    }

    /// Stop accepting sends, let queued ones finish, and join the worker
    pub async fn close(self) {
        let Publisher {
            queue,
            worker,
            config,
            ..
        } = self;
        drop(queue);
        if let Err(e) = worker.await {
            error!(target: config.log_target.as_str(), "Publisher worker ended abnormally: {}", e);
        }
        info!(target: config.log_target.as_str(), "Publisher closed");
    }
}

/// Fans queued sends out to one lane per topic and joins the lanes once the
/// queue closes
async fn run_sender(
    transport: Arc<dyn Transport>,
    mut requests: mpsc::UnboundedReceiver<SendRequest>,
    in_flight: Arc<watch::Sender<usize>>,
    send_timeout: Duration,
    log_target: String,
) {
    let mut lanes: HashMap<TopicName, mpsc::UnboundedSender<SendRequest>> = HashMap::new();
    let mut workers = JoinSet::new();

    while let Some(request) = requests.recv().await {
        let lane = lanes.entry(request.topic.clone()).or_insert_with(|| {
            debug!(target: log_target.as_str(), "Opening send lane for {}", request.topic);
            let (lane, queued) = mpsc::unbounded_channel();
            workers.spawn(run_lane(
                transport.clone(),
                queued,
                in_flight.clone(),
                send_timeout,
                log_target.clone(),
            ));
            lane
        });
        if let Err(mpsc::error::SendError(request)) = lane.send(request) {
            error!(target: log_target.as_str(), "Send lane for {} is gone", request.topic);
            let _ = request.reply.send(Err(PipelineError::TransportUnavailable(
                "publisher send lane stopped".to_string(),
            )));
            in_flight.send_modify(|n| *n = n.saturating_sub(1));
        }
    }

    drop(lanes);
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(target: log_target.as_str(), "Send lane ended abnormally: {}", e);
        }
    }
    debug!(target: log_target.as_str(), "Publisher queue closed");
}

/// Sends one topic's records in submission order, waiting for each
/// acknowledgement before the next
async fn run_lane(
    transport: Arc<dyn Transport>,
    mut requests: mpsc::UnboundedReceiver<SendRequest>,
    in_flight: Arc<watch::Sender<usize>>,
    send_timeout: Duration,
    log_target: String,
) {
    while let Some(SendRequest {
        topic,
        message,
        reply,
    }) = requests.recv().await
    {
        let key = message.key.clone();
        let outcome = match tokio::time::timeout(send_timeout, transport.publish(&topic, message)).await {
            Ok(Ok(ack)) => {
                info!(
                    target: log_target.as_str(),
                    "Sent message with key {:?} to {}:{} at offset {}",
                    key, ack.topic, ack.partition, ack.offset
                );
                Ok(DeliveryResult {
                    topic: ack.topic,
                    partition: ack.partition,
                    offset: ack.offset,
                    timestamp: ack.timestamp,
                })
            }
            Ok(Err(e)) => {
                error!(target: log_target.as_str(), "Failed to send message to {}: {}", topic, e);
                Err(PipelineError::from(e))
            }
            Err(_) => {
                error!(
                    target: log_target.as_str(),
                    "No acknowledgement from {} within {:?}", topic, send_timeout
                );
                Err(PipelineError::Timeout(send_timeout))
            }
        };

        // The caller may have dropped its future; the outcome is already logged.
        let _ = reply.send(outcome);
        in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
