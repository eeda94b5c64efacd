//! Work dispatcher: bounded pool of blocking workers.
//!
//! `on_message` never blocks. Each delivery becomes a task that waits for one
//! of `pool_size` permits, then runs decode, tool and encode on the blocking
//! thread pool and submits exactly one [`Resolution`] back to the connection.
//! Tasks waiting for a permit form an unbounded queue; [`WorkDispatcher::backlog`]
//! reports its length.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::codec::JobHandler;
use crate::connection::ConnectionHandle;
use crate::envelope::{Delivery, JobEnvelope};
use crate::publisher::Resolution;

/// Dispatches deliveries onto the worker pool.
#[derive(Clone)]
pub struct WorkDispatcher {
    /// Job handler run on pool threads.
    handler: Arc<dyn JobHandler>,

    /// Semaphore for concurrency control.
    permits: Arc<Semaphore>,

    /// Route back to the connection task.
    connection: ConnectionHandle,

    /// Deliveries accepted but still waiting for a permit.
    backlog: Arc<AtomicUsize>,

    pool_size: usize,
}

impl WorkDispatcher {
    /// Create a dispatcher running at most `pool_size` jobs at once.
    pub fn new(handler: Arc<dyn JobHandler>, pool_size: usize, connection: ConnectionHandle) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            handler,
            permits: Arc::new(Semaphore::new(pool_size)),
            connection,
            backlog: Arc::new(AtomicUsize::new(0)),
            pool_size,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Deliveries waiting for a free worker.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::SeqCst)
    }

    /// Enqueue a delivery and return immediately.
    ///
    /// Must be called from within the connection's runtime.
    pub fn on_message(&self, delivery: Delivery) {
        let backlog = self.backlog.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(delivery_tag = %delivery.tag, backlog, "Dispatching job");

        let handler = self.handler.clone();
        let permits = self.permits.clone();
        let connection = self.connection.clone();
        let backlog = self.backlog.clone();

        tokio::spawn(async move {
            let tag = delivery.tag;

            // Wait for available slot
            let permit = permits.acquire_owned().await;
            backlog.fetch_sub(1, Ordering::SeqCst);

            let permit = match permit {
                Ok(permit) => permit,
                Err(_) => {
                    submit(&connection, Resolution::reject(tag, "worker pool is closed"));
                    return;
                }
            };

            let job = tokio::task::spawn_blocking(move || {
                // Keep permit until resolved
                let _permit = permit;
                let resolution = process(handler.as_ref(), delivery);
                submit(&connection, resolution);
            });

            if let Err(e) = job.await {
                tracing::error!(delivery_tag = %tag, error = %e, "Pool worker did not complete");
            }
        });
    }
}

fn submit(connection: &ConnectionHandle, resolution: Resolution) {
    let tag = resolution.tag;
    if let Err(e) = connection.submit_threadsafe(resolution) {
        tracing::error!(delivery_tag = %tag, error = %e, "Failed to hand resolution to connection");
    }
}

/// Run one delivery through the handler. Always produces a resolution.
pub(crate) fn process(handler: &dyn JobHandler, delivery: Delivery) -> Resolution {
    let tag = delivery.tag;
    let tool = handler.tool_name();

    let envelope = match JobEnvelope::from_delivery(&delivery) {
        Ok(envelope) => envelope,
        Err(e) => return Resolution::reject(tag, e.to_string()),
    };

    tracing::info!(tool, correlation_id = %envelope.correlation_id, "Received job");

    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&envelope.body))) {
        Ok(Ok(body)) => Resolution::reply(tag, envelope.reply_to, envelope.correlation_id, body),
        Ok(Err(e)) => {
            tracing::warn!(tool, correlation_id = %envelope.correlation_id, error = %e, "Job failed");
            Resolution::reject(tag, e.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(tool, correlation_id = %envelope.correlation_id, panic = %message, "Tool panicked");
            Resolution::reject(tag, format!("tool panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
