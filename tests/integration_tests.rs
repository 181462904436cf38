//! Integration tests for the embedded broker
//!
//! These tests exercise the broker through the transport boundary the
//! publisher and subscriber are built on.

use bytes::Bytes;
use kafka_pubsub::domain::entities::Message;
use kafka_pubsub::domain::errors::{DomainError, TransportError};
use kafka_pubsub::domain::services::MessageService;
use kafka_pubsub::infrastructure::persistence::InMemoryTopicRepository;
use kafka_pubsub::{
    EmbeddedBroker, GroupId, Offset, OffsetReset, OutboundMessage, PartitionId, TopicName,
    TopicPartition, Transport,
};
use std::sync::Arc;
use std::time::Duration;

fn topic(name: &str) -> TopicName {
    TopicName::new(name).unwrap()
}

fn group(name: &str) -> GroupId {
    GroupId::new(name).unwrap()
}

fn record(key: Option<&str>, value: &'static str) -> OutboundMessage {
    OutboundMessage::new(key.map(str::to_string), Bytes::from_static(value.as_bytes()))
}

/// Offsets within a partition start at zero and are dense
#[tokio::test]
async fn test_message_service_assigns_offsets() {
    // Arrange
    let topic_repo = Arc::new(InMemoryTopicRepository::new());
    let message_service = MessageService::new(topic_repo);
    let name = topic("test-topic");
    message_service.ensure_topic(&name, 1).await.unwrap();

    // Act
    let first = message_service
        .append(&name, PartitionId(0), Message::new(None, Bytes::from_static(b"one")))
        .await
        .unwrap();
    let second = message_service
        .append(&name, PartitionId(0), Message::new(None, Bytes::from_static(b"two")))
        .await
        .unwrap();

    // Assert
    assert_eq!(first, Offset::new(0));
    assert_eq!(second, Offset::new(1));
    let messages = message_service
        .get_messages(&name, PartitionId(0), Offset::new(1), 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].value, Bytes::from_static(b"two"));
}

/// Creating a topic twice is rejected
#[tokio::test]
async fn test_topic_creation() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("create-test");

    broker.create_topic(&name, 3).await.unwrap();
    let err = broker.create_topic(&name, 3).await.unwrap_err();

    assert!(matches!(
        err,
        TransportError::Domain(DomainError::TopicAlreadyExists(_))
    ));
    assert_eq!(broker.topics().await.unwrap(), vec![name]);
}

/// Publishing to an unknown topic creates it
#[tokio::test]
async fn test_publish_auto_creates_topic() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("auto-created");

    let ack = broker.publish(&name, record(None, "hello")).await.unwrap();

    assert_eq!(ack.topic, name);
    assert_eq!(ack.partition, PartitionId(0));
    assert_eq!(ack.offset, Offset::new(0));
}

/// Records with the same key always go to the same partition
#[tokio::test]
async fn test_keyed_records_share_a_partition() {
    let broker = EmbeddedBroker::with_partitions(4);
    let name = topic("keyed");

    let mut partitions = Vec::new();
    for _ in 0..5 {
        partitions.push(broker.publish(&name, record(Some("user-1"), "x")).await.unwrap().partition);
    }

    assert!(partitions.windows(2).all(|w| w[0] == w[1]));
    let tp = TopicPartition::new(name, partitions[0]);
    assert_eq!(broker.high_watermark(&tp).await.unwrap(), Offset::new(5));
}

/// A subscription reads back what was published and resumes from commits
#[tokio::test]
async fn test_subscription_resumes_from_committed_offset() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("resume");
    let group = group("g1");
    for value in ["a", "b", "c"] {
        broker.publish(&name, record(None, value)).await.unwrap();
    }

    let mut first = broker.subscribe(&name, &group, OffsetReset::Earliest).await.unwrap();
    let batch = first.poll(2, Duration::from_millis(50)).await.unwrap();
    assert_eq!(batch.len(), 2);
    first.commit(PartitionId(0), batch[0].offset.next()).await.unwrap();
    first.close().await.unwrap();

    let mut second = broker.subscribe(&name, &group, OffsetReset::Earliest).await.unwrap();
    let batch = second.poll(10, Duration::from_millis(50)).await.unwrap();
    let values: Vec<_> = batch.iter().map(|m| m.value.clone()).collect();
    assert_eq!(values, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
}

/// Offset reset decides where a group without commits starts
#[tokio::test]
async fn test_offset_reset_policies() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("reset");
    broker.publish(&name, record(None, "old")).await.unwrap();

    let mut latest = broker
        .subscribe(&name, &group("latest"), OffsetReset::Latest)
        .await
        .unwrap();
    assert!(latest.poll(10, Duration::from_millis(20)).await.unwrap().is_empty());
    broker.publish(&name, record(None, "new")).await.unwrap();
    let batch = latest.poll(10, Duration::from_millis(200)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].value, Bytes::from_static(b"new"));

    let err = broker
        .subscribe(&name, &group("strict"), OffsetReset::None)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        TransportError::Domain(DomainError::NoCommittedOffset(_, _))
    ));
}

/// A waiting poll wakes up when a record arrives
#[tokio::test]
async fn test_poll_wakes_on_publish() {
    let broker = Arc::new(EmbeddedBroker::in_memory());
    let name = topic("wakeup");
    let mut subscription = broker
        .subscribe(&name, &group("g"), OffsetReset::Earliest)
        .await
        .unwrap();

    let publisher = broker.clone();
    let target = name.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.publish(&target, record(None, "late")).await.unwrap();
    });

    let batch = subscription.poll(10, Duration::from_secs(5)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].offset, Offset::new(0));
}

/// Seeking back makes a record visible again
#[tokio::test]
async fn test_seek_rewinds_position() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("seek");
    broker.publish(&name, record(None, "only")).await.unwrap();

    let mut subscription = broker
        .subscribe(&name, &group("g"), OffsetReset::Earliest)
        .await
        .unwrap();
    assert_eq!(subscription.poll(10, Duration::from_millis(20)).await.unwrap().len(), 1);
    assert!(subscription.poll(10, Duration::from_millis(20)).await.unwrap().is_empty());

    subscription.seek(PartitionId(0), Offset::new(0)).await.unwrap();
    assert_eq!(subscription.poll(10, Duration::from_millis(20)).await.unwrap().len(), 1);
    assert!(subscription.seek(PartitionId(9), Offset::new(0)).await.is_err());
}

/// An unavailable broker rejects publishes and polls
#[tokio::test]
async fn test_unavailable_broker() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("down");
    let mut subscription = broker
        .subscribe(&name, &group("g"), OffsetReset::Earliest)
        .await
        .unwrap();

    broker.set_available(false);
    assert!(matches!(
        broker.publish(&name, record(None, "x")).await,
        Err(TransportError::Unavailable(_))
    ));
    assert!(matches!(
        subscription.poll(1, Duration::from_millis(10)).await,
        Err(TransportError::Unavailable(_))
    ));

    broker.set_available(true);
    assert!(broker.publish(&name, record(None, "x")).await.is_ok());
}

/// A group holds one open subscription per topic until it is closed or dropped
#[tokio::test]
async fn test_group_membership_is_exclusive() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("members");
    let group = group("g");

    let mut first = broker.subscribe(&name, &group, OffsetReset::Earliest).await.unwrap();
    assert!(broker.is_member(&name, &group));
    let err = broker
        .subscribe(&name, &group, OffsetReset::Earliest)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TransportError::AlreadySubscribed { .. }));
    assert!(broker
        .subscribe(&name, &GroupId::new("other").unwrap(), OffsetReset::Earliest)
        .await
        .is_ok());

    first.close().await.unwrap();
    assert!(!broker.is_member(&name, &group));
    let second = broker.subscribe(&name, &group, OffsetReset::Earliest).await.unwrap();
    drop(second);
    assert!(!broker.is_member(&name, &group));
}

/// A failed subscribe leaves the group free
#[tokio::test]
async fn test_failed_subscribe_releases_membership() {
    let broker = EmbeddedBroker::in_memory();
    let name = topic("strict-members");
    let group = group("g");

    assert!(broker.subscribe(&name, &group, OffsetReset::None).await.is_err());
    assert!(!broker.is_member(&name, &group));
}

/// Ack delays beyond `u64::MAX` milliseconds saturate instead of wrapping
#[tokio::test]
async fn test_huge_ack_delay_saturates() {
    let broker = EmbeddedBroker::in_memory();
    // 18_446_744_073_709_552_000 ms wraps to 384 ms when narrowed to u64
    broker.set_ack_delay(Duration::from_secs(18_446_744_073_709_552));

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        broker.publish(&topic("slow-acks"), record(None, "x")),
    )
    .await;

    assert!(outcome.is_err());
}
