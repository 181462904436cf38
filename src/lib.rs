//! # Kafka-PubSub
//!
//! A typed publish/subscribe pipeline over a Kafka-style broker with
//! at-least-once delivery and graceful shutdown.
//!
//! ## Architecture
//!
//! - **Domain Layer**: payloads, envelopes, value objects and the transport boundary
//! - **Application Layer**: codec, publisher, subscriber and delivery tracker
//! - **Infrastructure Layer**: the in-process embedded broker and transport registry
//!
//! ## Usage
//!
//! ```rust
//! use kafka_pubsub::{
//!     DeliveryRecord, DeliveryTracker, EmbeddedBroker, Envelope, GroupId, HandlerError,
//!     JsonCodec, Person, Publisher, PublisherConfig, Subscriber, SubscriberConfig, TopicName,
//!     Transport,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker: Arc<dyn Transport> = Arc::new(EmbeddedBroker::in_memory());
//!     let codec = Arc::new(JsonCodec::<Person>::new());
//!     let topic = TopicName::new("people")?;
//!
//!     let tracker = DeliveryTracker::new(1);
//!     let received = tracker.clone();
//!     let subscriber = Subscriber::new(
//!         broker.clone(),
//!         codec.clone(),
//!         SubscriberConfig::new(GroupId::new("json")?),
//!     );
//!     let subscription = subscriber
//!         .subscribe(topic.clone(), move |record: DeliveryRecord<Person>| -> Result<(), HandlerError> {
//!             println!("received {}", record.payload());
//!             received.record_one();
//!             Ok(())
//!         })
//!         .await?;
//!
//!     let publisher = Publisher::new(broker, codec, PublisherConfig::default());
//!     publisher
//!         .send(&topic, Envelope::new(Person::new("Roignant", "Cedric")))?
//!         .await?;
//!
//!     assert!(tracker.wait(Duration::from_secs(10)).await);
//!     subscription.stop().await;
//!     publisher.close().await;
//!     Ok(())
//! }
//! ```

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod config;

// Re-export commonly used types for convenience
pub use domain::entities::{DeliveryRecord, Envelope, Person};
pub use domain::errors::{HandlerError, PipelineError, TransportError};
pub use domain::transport::{Ack, InboundMessage, OutboundMessage, Transport, TransportSubscription};
pub use domain::value_objects::{GroupId, Offset, OffsetReset, PartitionId, TopicName, TopicPartition};
pub use application::codec::{Codec, JsonCodec};
pub use application::publisher::{DeliveryFuture, DeliveryResult, Publisher, PublisherConfig};
pub use application::subscriber::{
    DeserializationPolicy, RecordHandler, Subscriber, SubscriberConfig, SubscriptionHandle,
    SubscriptionState, SubscriptionStats,
};
pub use application::tracker::DeliveryTracker;
pub use infrastructure::embedded::EmbeddedBroker;
pub use infrastructure::registry::TransportRegistry;
