//! Tool Worker
//!
//! Consumes image-processing jobs from a broker queue, runs them on a bounded
//! worker pool and publishes correlated replies.
//!
//! This crate provides:
//! - Broker channel abstraction over NATS JetStream (and an in-memory broker)
//! - Single-task broker connection loop with a thread-safe resolution queue
//! - Work dispatcher bounding concurrent tool invocations
//! - Reply publisher / acknowledger
//! - JSON codec around the image tool adapters

pub mod broker;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod worker;

pub use config::WorkerConfig;
pub use error::WorkerError;
pub use worker::Worker;
