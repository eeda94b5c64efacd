//! Broker channel abstraction.
//!
//! A [`BrokerChannel`] is owned by exactly one [`BrokerConnection`] task, and
//! every method takes `&mut self`, so no two callers can drive it at once.
//! Other threads reach the broker only through
//! [`ConnectionHandle::submit_threadsafe`].
//!
//! [`BrokerConnection`]: crate::connection::BrokerConnection
//! [`ConnectionHandle::submit_threadsafe`]: crate::connection::ConnectionHandle::submit_threadsafe

pub mod memory;
pub mod nats;
pub mod topology;

use async_trait::async_trait;
use bytes::Bytes;

use crate::envelope::{Delivery, DeliveryTag};
use crate::error::WorkerError;

pub use memory::{MemoryBroker, MemoryChannel};
pub use nats::NatsChannel;
pub use topology::{Exchange, Topology};

/// Transport operations used by the connection loop.
#[async_trait]
pub trait BrokerChannel: Send + 'static {
    /// Declare the topology idempotently and start consuming from the queue.
    async fn setup(&mut self, topology: &Topology) -> Result<(), WorkerError>;

    /// Wait for the next delivery.
    ///
    /// `None` means the delivery stream ended. Must be cancel-safe: the
    /// connection loop drops this future whenever a command arrives first.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, WorkerError>>;

    /// Publish a reply without waiting for delivery confirmation.
    async fn publish(
        &mut self,
        subject: &str,
        correlation_id: &str,
        body: Bytes,
    ) -> Result<(), WorkerError>;

    /// Acknowledge a delivery.
    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), WorkerError>;

    /// Negatively acknowledge a delivery, optionally asking for redelivery.
    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), WorkerError>;

    /// Report that a delivery is still being worked on, postponing redelivery.
    async fn in_progress(&mut self, tag: DeliveryTag) -> Result<(), WorkerError>;

    /// Stop consuming and flush pending writes.
    async fn close(&mut self) -> Result<(), WorkerError>;
}
