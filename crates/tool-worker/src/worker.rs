//! Worker lifecycle management.

use std::future::Future;
use std::sync::Arc;

use crate::broker::{BrokerChannel, NatsChannel};
use crate::codec::{self, JobHandler};
use crate::config::WorkerConfig;
use crate::connection::BrokerConnection;
use crate::dispatcher::WorkDispatcher;
use crate::error::WorkerError;

/// A tool worker: one broker connection feeding one worker pool.
pub struct Worker {
    /// Worker configuration.
    config: WorkerConfig,

    /// Job handler for the configured tool.
    handler: Arc<dyn JobHandler>,
}

impl Worker {
    /// Create a worker for the tool named in `config`.
    pub fn new(config: WorkerConfig) -> Self {
        let handler = codec::handler_for(&config);
        Self { config, handler }
    }

    /// Create a worker with a custom job handler.
    pub fn with_handler(config: WorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        Self { config, handler }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Connect to NATS and serve until `shutdown` completes or the connection drops.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        tracing::info!(
            worker_id = %self.config.worker_id,
            tool = %self.config.tool,
            hostname = %hostname,
            broker = %self.config.broker_url(),
            "Starting tool worker"
        );

        let client_name = format!("{}-worker-{}", self.config.tool, self.config.worker_id);
        let channel = NatsChannel::connect(&self.config.broker_url(), &client_name).await?;

        self.serve(channel, shutdown).await
    }

    /// Serve over an already connected channel.
    pub async fn serve<C, F>(&self, channel: C, shutdown: F) -> Result<(), WorkerError>
    where
        C: BrokerChannel,
        F: Future<Output = ()>,
    {
        let mut connection = BrokerConnection::new(
            channel,
            self.config.topology.clone(),
            self.handler.tool_name(),
            self.config.shutdown_grace,
        );
        let dispatcher = WorkDispatcher::new(self.handler.clone(), self.config.pool_size, connection.handle());

        connection.setup().await?;
        let result = connection.run_until(&dispatcher, shutdown).await;

        tracing::info!(
            worker_id = %self.config.worker_id,
            backlog = dispatcher.backlog(),
            "Worker stopped"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use image_tools::ToolKind;
    use std::time::Duration;

    #[test]
    fn test_worker_config() {
        let worker = Worker::new(WorkerConfig::defaults(ToolKind::Brightness));
        assert!(!worker.config().worker_id.is_empty());
        assert_eq!(worker.handler.tool_name(), "brightness");
    }

    #[tokio::test]
    async fn test_serve_declares_topology() {
        let (broker, channel) = MemoryBroker::open();
        let worker = Worker::new(WorkerConfig::defaults(ToolKind::Scale));

        worker
            .serve(channel, tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap();

        let declared = broker.declared();
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].queue, "scale_input_queue");
        assert!(broker.is_closed());
    }
}
