//! In-process broker.
//!
//! [`MemoryBroker`] is the caller side: it injects deliveries and inspects
//! what the worker published and how each delivery was terminated.
//! [`MemoryChannel`] is the worker side and implements [`BrokerChannel`].
//! Every broker call records the OS thread it ran on.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tokio::sync::{mpsc, Notify};

use super::topology::Topology;
use super::BrokerChannel;
use crate::envelope::{Delivery, DeliveryTag};
use crate::error::WorkerError;

/// A reply published by the worker.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub correlation_id: String,
    pub body: Bytes,
    pub thread: ThreadId,
}

/// Terminal action taken on a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Ack,
    Nack { requeue: bool },
}

/// A terminal action and the thread it ran on.
#[derive(Debug, Clone)]
pub struct Terminal {
    pub tag: DeliveryTag,
    pub kind: TerminalKind,
    pub thread: ThreadId,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_tag: u64,
    declared: Vec<Topology>,
    topology_conflict: Option<String>,
    published: Vec<PublishedMessage>,
    terminals: Vec<Terminal>,
    progress: Vec<DeliveryTag>,
    disconnected: bool,
    closed: bool,
}

/// Caller-side handle of the in-process broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    disconnect: Arc<Notify>,
}

/// Worker-side channel of the in-process broker.
pub struct MemoryChannel {
    state: Arc<Mutex<MemoryState>>,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    disconnect: Arc<Notify>,
    consuming: bool,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    /// Create a broker and the channel a worker consumes it through.
    pub fn open() -> (MemoryBroker, MemoryChannel) {
        let state = Arc::new(Mutex::new(MemoryState {
            next_tag: 1,
            ..Default::default()
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        let disconnect = Arc::new(Notify::new());

        let broker = MemoryBroker {
            state: state.clone(),
            deliveries: tx,
            disconnect: disconnect.clone(),
        };
        let channel = MemoryChannel {
            state,
            deliveries: rx,
            disconnect,
            consuming: false,
        };
        (broker, channel)
    }

    /// Enqueue a request; returns the delivery tag it will carry.
    pub fn deliver(
        &self,
        correlation_id: Option<&str>,
        reply_to: Option<&str>,
        body: impl Into<Bytes>,
    ) -> DeliveryTag {
        let tag = {
            let mut state = lock(&self.state);
            let tag = DeliveryTag(state.next_tag);
            state.next_tag += 1;
            tag
        };
        let delivery = Delivery {
            tag,
            correlation_id: correlation_id.map(String::from),
            reply_to: reply_to.map(String::from),
            body: body.into(),
        };
        if self.deliveries.send(delivery).is_err() {
            tracing::warn!(delivery_tag = %tag, "Delivery dropped, channel is gone");
        }
        tag
    }

    /// Make the next `setup` fail with a topology conflict.
    pub fn reject_topology(&self, reason: impl Into<String>) {
        lock(&self.state).topology_conflict = Some(reason.into());
    }

    /// End the delivery stream, simulating connection loss.
    pub fn disconnect(&self) {
        lock(&self.state).disconnected = true;
        self.disconnect.notify_one();
    }

    pub fn declared(&self) -> Vec<Topology> {
        lock(&self.state).declared.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    pub fn terminals(&self) -> Vec<Terminal> {
        lock(&self.state).terminals.clone()
    }

    /// Terminal actions recorded for one delivery.
    pub fn terminals_for(&self, tag: DeliveryTag) -> Vec<TerminalKind> {
        lock(&self.state)
            .terminals
            .iter()
            .filter(|t| t.tag == tag)
            .map(|t| t.kind)
            .collect()
    }

    /// How many times a delivery was reported as still in progress.
    pub fn progress_for(&self, tag: DeliveryTag) -> usize {
        lock(&self.state).progress.iter().filter(|t| **t == tag).count()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl MemoryChannel {
    fn record_terminal(&self, tag: DeliveryTag, kind: TerminalKind) {
        lock(&self.state).terminals.push(Terminal {
            tag,
            kind,
            thread: thread::current().id(),
        });
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn setup(&mut self, topology: &Topology) -> Result<(), WorkerError> {
        topology.validate()?;

        let mut state = lock(&self.state);
        if let Some(reason) = state.topology_conflict.take() {
            return Err(WorkerError::Topology(reason));
        }
        // Redeclaring an identical topology is a no-op.
        if !state.declared.contains(topology) {
            state.declared.push(topology.clone());
        }
        self.consuming = true;
        Ok(())
    }

    async fn next_delivery(&mut self) -> Option<Result<Delivery, WorkerError>> {
        if !self.consuming {
            return Some(Err(WorkerError::Connection(
                "next_delivery called before setup".to_string(),
            )));
        }
        let disconnected = lock(&self.state).disconnected;
        if disconnected {
            return None;
        }

        tokio::select! {
            delivery = self.deliveries.recv() => delivery.map(Ok),
            _ = self.disconnect.notified() => None,
        }
    }

    async fn publish(
        &mut self,
        subject: &str,
        correlation_id: &str,
        body: Bytes,
    ) -> Result<(), WorkerError> {
        lock(&self.state).published.push(PublishedMessage {
            subject: subject.to_string(),
            correlation_id: correlation_id.to_string(),
            body,
            thread: thread::current().id(),
        });
        Ok(())
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), WorkerError> {
        self.record_terminal(tag, TerminalKind::Ack);
        Ok(())
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), WorkerError> {
        self.record_terminal(tag, TerminalKind::Nack { requeue });
        Ok(())
    }

    async fn in_progress(&mut self, tag: DeliveryTag) -> Result<(), WorkerError> {
        lock(&self.state).progress.push(tag);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WorkerError> {
        self.consuming = false;
        lock(&self.state).closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_and_receive() {
        let (broker, mut channel) = MemoryBroker::open();
        channel.setup(&Topology::default_exchange("q")).await.unwrap();

        let tag = broker.deliver(Some("c-1"), Some("r"), &b"{}"[..]);
        let delivery = channel.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.tag, tag);
        assert_eq!(delivery.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(delivery.reply_to.as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let (broker, mut channel) = MemoryBroker::open();
        let topology = Topology::shared("tools-exchange", "ocr-queue");
        channel.setup(&topology).await.unwrap();
        channel.setup(&topology).await.unwrap();
        assert_eq!(broker.declared(), vec![topology]);
    }

    #[tokio::test]
    async fn test_topology_conflict() {
        let (broker, mut channel) = MemoryBroker::open();
        broker.reject_topology("queue declared with different arguments");
        let result = channel.setup(&Topology::default_exchange("q")).await;
        assert!(matches!(result, Err(WorkerError::Topology(_))));
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream() {
        let (broker, mut channel) = MemoryBroker::open();
        channel.setup(&Topology::default_exchange("q")).await.unwrap();
        broker.disconnect();
        assert!(channel.next_delivery().await.is_none());
    }

    #[tokio::test]
    async fn test_terminals_recorded() {
        let (broker, mut channel) = MemoryBroker::open();
        channel.ack(DeliveryTag(1)).await.unwrap();
        channel.nack(DeliveryTag(2), false).await.unwrap();

        assert_eq!(broker.terminals_for(DeliveryTag(1)), vec![TerminalKind::Ack]);
        assert_eq!(
            broker.terminals_for(DeliveryTag(2)),
            vec![TerminalKind::Nack { requeue: false }]
        );
    }

    #[tokio::test]
    async fn test_progress_recorded() {
        let (broker, mut channel) = MemoryBroker::open();
        channel.in_progress(DeliveryTag(4)).await.unwrap();
        channel.in_progress(DeliveryTag(4)).await.unwrap();

        assert_eq!(broker.progress_for(DeliveryTag(4)), 2);
        assert_eq!(broker.progress_for(DeliveryTag(5)), 0);
        assert!(broker.terminals().is_empty());
    }
}
