use clap::Parser;
use std::time::Duration;

use crate::application::{publisher::PublisherConfig, subscriber::SubscriberConfig};
use crate::domain::{errors::PipelineError, value_objects::*};

/// Start-up options
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Comma-separated broker endpoints (host:port)
    #[arg(
        short = 'b',
        long,
        env = "KAFKA_BOOTSTRAP_SERVERS",
        value_delimiter = ',',
        default_value = "localhost:9092"
    )]
    pub bootstrap_servers: Vec<String>,

    /// Topic the person records are exchanged on
    #[arg(short, long, env = "KAFKA_TOPIC_JSON", default_value = "jsonKafka")]
    pub topic: String,

    /// Consumer group of the subscriber
    #[arg(short, long, env = "KAFKA_GROUP_ID", default_value = "json")]
    pub group_id: String,

    /// Where to start without a committed offset: earliest, latest or none
    #[arg(long, default_value = "earliest")]
    pub auto_offset_reset: OffsetReset,

    /// Partition count used when the topic is created
    #[arg(long, default_value_t = 1)]
    pub partitions: u32,

    /// Number of records to publish
    #[arg(short, long, default_value_t = 1)]
    pub messages: usize,

    #[arg(long, default_value_t = 5_000)]
    pub send_timeout_ms: u64,

    /// How long to wait for every record to be received
    #[arg(long, default_value_t = 10_000)]
    pub await_timeout_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    pub shutdown_grace_ms: u64,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bootstrap_servers: Vec<String>,
    pub topic: TopicName,
    pub group_id: GroupId,
    pub auto_offset_reset: OffsetReset,
    pub partitions: u32,
    pub messages: usize,
    pub send_timeout: Duration,
    pub await_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Args {
    pub fn into_config(self) -> Result<AppConfig, PipelineError> {
        let bootstrap_servers: Vec<String> = self
            .bootstrap_servers
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if bootstrap_servers.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one bootstrap server is required".to_string(),
            ));
        }
        for endpoint in &bootstrap_servers {
            validate_endpoint(endpoint)?;
        }
        if self.partitions == 0 {
            return Err(PipelineError::InvalidConfig(
                "partitions must be at least 1".to_string(),
            ));
        }

        Ok(AppConfig {
            bootstrap_servers,
            topic: TopicName::new(self.topic)?,
            group_id: GroupId::new(self.group_id)?,
            auto_offset_reset: self.auto_offset_reset,
            partitions: self.partitions,
            messages: self.messages,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            await_timeout: Duration::from_millis(self.await_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        })
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), PipelineError> {
    let invalid = || {
        PipelineError::InvalidConfig(format!(
            "bootstrap server '{}' is not of the form host:port",
            endpoint
        ))
    };
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}

impl AppConfig {
    pub fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            default_topic: Some(self.topic.clone()),
            send_timeout: self.send_timeout,
            ..PublisherConfig::default()
        }
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        let mut config = SubscriberConfig::new(self.group_id.clone());
        config.auto_offset_reset = self.auto_offset_reset;
        config.shutdown_grace = self.shutdown_grace;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<AppConfig, PipelineError> {
        let mut argv = vec!["kafka-pubsub"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn defaults_match_the_demo() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.bootstrap_servers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.topic.as_str(), "jsonKafka");
        assert_eq!(config.group_id.as_str(), "json");
        assert_eq!(config.auto_offset_reset, OffsetReset::Earliest);
        assert_eq!(config.await_timeout, Duration::from_secs(10));
    }

    #[test]
    fn bootstrap_servers_split_on_commas() {
        let config = parse(&["--bootstrap-servers", "a:9092, b:9093"]).unwrap();
        assert_eq!(config.bootstrap_servers, vec!["a:9092", "b:9093"]);
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        assert!(parse(&["-b", "localhost"]).is_err());
        assert!(parse(&["-b", "localhost:http"]).is_err());
    }

    #[test]
    fn empty_topic_is_rejected() {
        let err = parse(&["--topic", ""]).unwrap_err();
        assert!(matches!(err, PipelineError::Domain(_)));
    }

    #[test]
    fn offset_reset_is_parsed() {
        let config = parse(&["--auto-offset-reset", "latest"]).unwrap();
        assert_eq!(config.auto_offset_reset, OffsetReset::Latest);
        assert!(Args::try_parse_from(["kafka-pubsub", "--auto-offset-reset", "never"]).is_err());
    }

    #[test]
    fn derived_component_configs_carry_settings() {
        let config = parse(&["--send-timeout-ms", "250", "--group-id", "people"]).unwrap();
        let publisher = config.publisher_config();
        assert_eq!(publisher.send_timeout, Duration::from_millis(250));
        assert_eq!(publisher.default_topic, Some(config.topic.clone()));
        assert_eq!(config.subscriber_config().group_id.as_str(), "people");
    }
}
