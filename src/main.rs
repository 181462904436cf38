use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use kafka_pubsub::config::Args;
use kafka_pubsub::{
    DeliveryRecord, DeliveryTracker, EmbeddedBroker, Envelope, HandlerError, JsonCodec, Person,
    Publisher, Subscriber, Transport, TransportRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let config = Args::parse().into_config()?;

    info!(
        "Starting producer/consumer demo on topic {} via [{}]",
        config.topic,
        config.bootstrap_servers.join(", ")
    );

    // One transport per endpoint set, shared by the publisher and the subscriber
    let registry: TransportRegistry<EmbeddedBroker> = TransportRegistry::new();
    let broker = registry.get_or_connect(&config.bootstrap_servers, |_| {
        Arc::new(EmbeddedBroker::with_partitions(config.partitions))
    });
    broker.create_topic(&config.topic, config.partitions).await?;
    let transport: Arc<dyn Transport> = broker;
    let codec = Arc::new(JsonCodec::<Person>::new());

    let tracker = DeliveryTracker::new(config.messages);
    let received = tracker.clone();
    let subscriber = Subscriber::new(transport.clone(), codec.clone(), config.subscriber_config());
    let subscription = subscriber
        .subscribe(
            config.topic.clone(),
            move |record: DeliveryRecord<Person>| -> Result<(), HandlerError> {
                info!(
                    "received message='{}' from {}:{}@{}",
                    record.payload(),
                    record.topic(),
                    record.partition(),
                    record.offset()
                );
                received.record_one();
                Ok(())
            },
        )
        .await?;
    if !subscription.wait_until_running(Duration::from_secs(5)).await {
        anyhow::bail!("subscription on {} did not start", config.topic);
    }

    let publisher = Publisher::new(transport, codec, config.publisher_config());
    let mut deliveries = Vec::with_capacity(config.messages);
    for _ in 0..config.messages {
        let person = Person::new("Roignant", "Cédric");
        info!("sending message='{}' to topic='{}'", person, config.topic);
        deliveries.push(publisher.send_default(Envelope::new(person))?);
    }
    for delivery in deliveries {
        if let Err(e) = delivery.await {
            error!("Delivery failed: {}", e);
        }
    }

    let completed = tracker.wait(config.await_timeout).await;

    subscription.stop().await;
    publisher.close().await;

    if !completed {
        anyhow::bail!(
            "received {} of {} message(s) within {:?}",
            tracker.expected() - tracker.remaining(),
            tracker.expected(),
            config.await_timeout
        );
    }

    info!("Received all {} message(s)", tracker.expected());
    Ok(())
}
