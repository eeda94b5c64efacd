//! Worker configuration.

use image_tools::tools::ocr;
use image_tools::ToolKind;
use std::str::FromStr;
use std::time::Duration;

use crate::broker::topology::{Topology, DEFAULT_EXCHANGE};
use crate::error::WorkerError;

/// Default worker pool size.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Tool worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identifier (UUID).
    pub worker_id: String,

    /// Tool served by this worker.
    pub tool: ToolKind,

    /// Broker host.
    pub broker_host: String,

    /// Broker port.
    pub broker_port: u16,

    /// Queue/exchange declaration.
    pub topology: Topology,

    /// Maximum concurrent tool invocations.
    pub pool_size: usize,

    /// How long shutdown waits for in-flight jobs to resolve.
    pub shutdown_grace: Duration,

    /// OCR engine binary.
    pub ocr_binary: String,

    /// OCR recognition language.
    pub ocr_language: String,
}

impl WorkerConfig {
    /// Load configuration for `tool` from environment variables.
    pub fn from_env(tool: ToolKind) -> Result<Self, WorkerError> {
        Self::from_lookup(tool, |key| std::env::var(key).ok())
    }

    /// Load configuration for `tool` using `lookup` to resolve variables.
    pub fn from_lookup<F>(tool: ToolKind, lookup: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::defaults(tool);

        let worker_id = lookup("WORKER_ID").unwrap_or(defaults.worker_id);

        let broker_host = lookup("BROKER_HOST").unwrap_or(defaults.broker_host);

        let broker_port = parse_var(&lookup, "BROKER_PORT")?.unwrap_or(defaults.broker_port);

        let topology = match tool {
            ToolKind::Scale => {
                let queue = lookup("SCALE_INPUT_QUEUE").unwrap_or(defaults.topology.queue);
                Topology::default_exchange(queue)
            }
            _ => {
                let exchange = lookup("EXCHANGE").unwrap_or_else(|| DEFAULT_EXCHANGE.to_string());
                let queue = lookup("REQUEST_QUEUE").unwrap_or(defaults.topology.queue);
                Topology::shared(exchange, queue)
            }
        };
        let topology = Topology {
            prefetch: parse_var(&lookup, "PREFETCH")?.or(defaults.topology.prefetch),
            ack_wait: parse_var::<u64, _>(&lookup, "ACK_WAIT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.topology.ack_wait),
            max_age: parse_var::<u64, _>(&lookup, "STREAM_MAX_AGE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.topology.max_age),
            ..topology
        };
        topology.validate()?;

        let pool_size = parse_var(&lookup, "POOL_SIZE")?.unwrap_or(defaults.pool_size);
        if pool_size == 0 {
            return Err(WorkerError::Config("POOL_SIZE must be at least 1".to_string()));
        }

        let shutdown_grace = parse_var::<u64, _>(&lookup, "SHUTDOWN_GRACE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace);

        let ocr_binary = lookup("OCR_BINARY").unwrap_or(defaults.ocr_binary);

        let ocr_language = lookup("OCR_LANGUAGE").unwrap_or(defaults.ocr_language);

        Ok(Self {
            worker_id,
            tool,
            broker_host,
            broker_port,
            topology,
            pool_size,
            shutdown_grace,
            ocr_binary,
            ocr_language,
        })
    }

    /// Built-in defaults for `tool`.
    pub fn defaults(tool: ToolKind) -> Self {
        let topology = match tool {
            ToolKind::Ocr => Topology::shared(DEFAULT_EXCHANGE, "ocr-queue"),
            ToolKind::Brightness => Topology::shared(DEFAULT_EXCHANGE, "brightness-queue"),
            ToolKind::Autocrop => Topology::shared(DEFAULT_EXCHANGE, "autocrop-queue"),
            ToolKind::Scale => Topology::default_exchange("scale_input_queue").with_prefetch(1),
        };

        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            tool,
            broker_host: "localhost".to_string(),
            broker_port: 4222,
            topology,
            pool_size: DEFAULT_POOL_SIZE,
            shutdown_grace: Duration::from_secs(10),
            ocr_binary: ocr::DEFAULT_BINARY.to_string(),
            ocr_language: ocr::DEFAULT_LANGUAGE.to_string(),
        }
    }

    /// NATS server URL.
    pub fn broker_url(&self) -> String {
        format!("nats://{}:{}", self.broker_host, self.broker_port)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, WorkerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| WorkerError::Config(format!("{}='{}': {}", key, raw, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::topology::Exchange;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[])).unwrap();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.broker_url(), "nats://localhost:4222");
        assert_eq!(config.topology, Topology::shared("tools-exchange", "ocr-queue"));
        assert!(!config.worker_id.is_empty());
    }

    #[test]
    fn test_per_tool_queues() {
        let brightness = WorkerConfig::from_lookup(ToolKind::Brightness, lookup(&[])).unwrap();
        assert_eq!(brightness.topology.queue, "brightness-queue");

        let autocrop = WorkerConfig::from_lookup(ToolKind::Autocrop, lookup(&[])).unwrap();
        assert_eq!(autocrop.topology.queue, "autocrop-queue");

        let scale = WorkerConfig::from_lookup(ToolKind::Scale, lookup(&[("EXCHANGE", "ignored")])).unwrap();
        assert_eq!(scale.topology.exchange, Exchange::Default);
        assert_eq!(scale.topology.queue, "scale_input_queue");
        assert_eq!(scale.topology.prefetch, Some(1));
    }

    #[test]
    fn test_overrides() {
        let config = WorkerConfig::from_lookup(
            ToolKind::Ocr,
            lookup(&[
                ("BROKER_HOST", "nats.internal"),
                ("BROKER_PORT", "4333"),
                ("EXCHANGE", "imaging"),
                ("REQUEST_QUEUE", "ocr-fast"),
                ("POOL_SIZE", "12"),
                ("PREFETCH", "20"),
                ("SHUTDOWN_GRACE_SECS", "3"),
                ("WORKER_ID", "worker-1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.broker_url(), "nats://nats.internal:4333");
        assert_eq!(config.topology.routing_subject(), "imaging.ocr-fast");
        assert_eq!(config.topology.prefetch, Some(20));
        assert_eq!(config.pool_size, 12);
        assert_eq!(config.shutdown_grace, Duration::from_secs(3));
        assert_eq!(config.worker_id, "worker-1");
    }

    #[test]
    fn test_ack_wait_and_retention() {
        let config = WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[])).unwrap();
        assert_eq!(config.topology.ack_wait, Duration::from_secs(3600));
        assert_eq!(config.topology.max_age, Duration::from_secs(7 * 24 * 3600));

        let config = WorkerConfig::from_lookup(
            ToolKind::Scale,
            lookup(&[("ACK_WAIT_SECS", "900"), ("STREAM_MAX_AGE_SECS", "86400")]),
        )
        .unwrap();
        assert_eq!(config.topology.ack_wait, Duration::from_secs(900));
        assert_eq!(config.topology.max_age, Duration::from_secs(86400));

        assert!(WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("ACK_WAIT_SECS", "0")])).is_err());
        assert!(WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("ACK_WAIT_SECS", "soon")])).is_err());
    }

    #[test]
    fn test_invalid_values() {
        let err = WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("POOL_SIZE", "many")])).unwrap_err();
        assert!(matches!(err, WorkerError::Config(ref msg) if msg.contains("POOL_SIZE")));

        assert!(WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("POOL_SIZE", "0")])).is_err());
        assert!(WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("BROKER_PORT", "70000")])).is_err());
        assert!(WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("REQUEST_QUEUE", "ocr.queue")])).is_err());
    }

    #[test]
    fn test_independent_configs() {
        let a = WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("POOL_SIZE", "1")])).unwrap();
        let b = WorkerConfig::from_lookup(ToolKind::Ocr, lookup(&[("POOL_SIZE", "9")])).unwrap();
        assert_eq!((a.pool_size, b.pool_size), (1, 9));
        assert_ne!(a.worker_id, b.worker_id);
    }
}
