//! Broker connection loop.
//!
//! The connection owns the broker channel and is the only task that performs
//! I/O on it. It multiplexes three sources, in priority order:
//!
//! 1. the shutdown signal,
//! 2. resolutions submitted by pool workers through [`ConnectionHandle`],
//! 3. the keepalive tick, which reports outstanding deliveries as in progress
//!    so the broker does not redeliver jobs still waiting for a worker,
//! 4. incoming deliveries, which are handed to the [`WorkDispatcher`].
//!
//! Each accepted delivery tag stays outstanding until exactly one resolution
//! for it has been executed.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::broker::{BrokerChannel, Topology};
use crate::dispatcher::WorkDispatcher;
use crate::envelope::{Delivery, DeliveryTag};
use crate::error::WorkerError;
use crate::publisher::{ReplyPublisher, Resolution};

/// Thread-safe handle for scheduling work onto the connection task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Resolution>,
}

impl ConnectionHandle {
    /// Queue a resolution to run on the connection task at its next iteration.
    ///
    /// Callable from any thread, including blocking pool threads. Fails only
    /// once the connection has stopped.
    pub fn submit_threadsafe(&self, resolution: Resolution) -> Result<(), WorkerError> {
        self.commands.send(resolution).map_err(|e| {
            WorkerError::Connection(format!(
                "connection stopped, delivery {} left unresolved",
                e.0.tag
            ))
        })
    }

    /// Handle with no connection behind it, for observing submissions.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Resolution>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { commands: tx }, rx)
    }
}

enum LoopEvent {
    Shutdown,
    Resolve(Resolution),
    Keepalive,
    Delivery(Option<Result<Delivery, WorkerError>>),
}

/// Single connection to the broker and its consume loop.
pub struct BrokerConnection<C> {
    /// Exclusively owned broker channel.
    channel: C,

    /// Queue/exchange declaration.
    topology: Topology,

    /// Terminal action executor.
    publisher: ReplyPublisher,

    /// Resolutions submitted from pool threads.
    commands: mpsc::UnboundedReceiver<Resolution>,

    /// Sender side handed out to pool threads.
    handle: ConnectionHandle,

    /// Delivery tags accepted but not yet terminated.
    outstanding: HashSet<DeliveryTag>,

    /// How long shutdown waits for outstanding deliveries.
    shutdown_grace: Duration,

    /// Whether the topology has been declared.
    ready: bool,
}

impl<C: BrokerChannel> BrokerConnection<C> {
    /// Create a connection around an already connected channel.
    pub fn new(channel: C, topology: Topology, tool: &'static str, shutdown_grace: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            channel,
            publisher: ReplyPublisher::new(topology.clone(), tool),
            topology,
            commands: rx,
            handle: ConnectionHandle { commands: tx },
            outstanding: HashSet::new(),
            shutdown_grace,
            ready: false,
        }
    }

    /// Handle other threads use to submit resolutions.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Number of accepted deliveries without a terminal action yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Declare the topology and register the consumer. Safe to call again.
    pub async fn setup(&mut self) -> Result<(), WorkerError> {
        self.channel.setup(&self.topology).await?;
        self.ready = true;

        tracing::info!(
            queue = %self.topology.queue,
            stream = %self.topology.stream_name(),
            subject = %self.topology.routing_subject(),
            "Topology declared"
        );
        Ok(())
    }

    /// Consume until the connection is lost.
    pub async fn start(&mut self, dispatcher: &WorkDispatcher) -> Result<(), WorkerError> {
        self.run_until(dispatcher, std::future::pending()).await
    }

    /// Consume until `shutdown` completes or the connection is lost.
    ///
    /// On shutdown, outstanding deliveries are given the grace period to
    /// resolve before the channel is closed.
    pub async fn run_until<F>(&mut self, dispatcher: &WorkDispatcher, shutdown: F) -> Result<(), WorkerError>
    where
        F: Future<Output = ()>,
    {
        if !self.ready {
            self.setup().await?;
        }
        tokio::pin!(shutdown);
        let mut keepalive = self.keepalive();

        tracing::info!(queue = %self.topology.queue, pool_size = dispatcher.pool_size(), "Start consuming");

        let result = loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => LoopEvent::Shutdown,
                Some(resolution) = self.commands.recv() => LoopEvent::Resolve(resolution),
                _ = keepalive.tick() => LoopEvent::Keepalive,
                delivery = self.channel.next_delivery() => LoopEvent::Delivery(delivery),
            };

            match event {
                LoopEvent::Shutdown => {
                    tracing::info!("Shutdown requested");
                    break Ok(());
                }
                LoopEvent::Resolve(resolution) => {
                    if let Err(e) = self.resolve(resolution).await {
                        break Err(e);
                    }
                }
                LoopEvent::Keepalive => {
                    if let Err(e) = self.report_progress().await {
                        break Err(e);
                    }
                }
                LoopEvent::Delivery(Some(Ok(delivery))) => self.accept(dispatcher, delivery),
                LoopEvent::Delivery(Some(Err(e))) => break Err(e),
                LoopEvent::Delivery(None) => {
                    break Err(WorkerError::Connection("delivery stream closed".to_string()));
                }
            }
        };

        match result {
            Ok(()) => {
                self.drain(&mut keepalive).await?;
                self.channel.close().await
            }
            Err(e) => {
                tracing::error!(error = %e, outstanding = self.outstanding.len(), "Connection loop failed");
                if let Err(close_err) = self.channel.close().await {
                    tracing::debug!(error = %close_err, "Close after failure also failed");
                }
                Err(e)
            }
        }
    }

    fn keepalive(&self) -> Interval {
        let period = self.topology.keepalive_interval();
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    fn accept(&mut self, dispatcher: &WorkDispatcher, delivery: Delivery) {
        if !self.outstanding.insert(delivery.tag) {
            tracing::error!(delivery_tag = %delivery.tag, "Duplicate delivery tag, ignoring delivery");
            return;
        }
        tracing::debug!(delivery_tag = %delivery.tag, "Delivery accepted");
        dispatcher.on_message(delivery);
    }

    async fn resolve(&mut self, resolution: Resolution) -> Result<(), WorkerError> {
        if !self.outstanding.remove(&resolution.tag) {
            tracing::error!(
                delivery_tag = %resolution.tag,
                "Resolution for a delivery that is not outstanding, ignoring"
            );
            return Ok(());
        }
        let tag = resolution.tag;
        let terminated = self.publisher.resolve(&mut self.channel, resolution).await?;
        tracing::debug!(
            delivery_tag = %tag,
            terminated = ?terminated,
            outstanding = self.outstanding.len(),
            "Delivery resolved"
        );
        Ok(())
    }

    /// Postpone broker redelivery of every outstanding delivery.
    async fn report_progress(&mut self) -> Result<(), WorkerError> {
        if self.outstanding.is_empty() {
            return Ok(());
        }
        tracing::debug!(outstanding = self.outstanding.len(), "Reporting deliveries in progress");
        for tag in &self.outstanding {
            self.channel.in_progress(*tag).await?;
        }
        Ok(())
    }

    /// Keep executing resolutions until nothing is outstanding or the grace
    /// period ends.
    async fn drain(&mut self, keepalive: &mut Interval) -> Result<(), WorkerError> {
        if self.outstanding.is_empty() {
            return Ok(());
        }
        tracing::info!(outstanding = self.outstanding.len(), "Draining in-flight jobs");

        let deadline = tokio::time::sleep(self.shutdown_grace);
        tokio::pin!(deadline);

        while !self.outstanding.is_empty() {
            tokio::select! {
                biased;
                Some(resolution) = self.commands.recv() => self.resolve(resolution).await?,
                _ = keepalive.tick() => self.report_progress().await?,
                _ = &mut deadline => {
                    tracing::warn!(
                        outstanding = self.outstanding.len(),
                        "Grace period elapsed, leaving deliveries to broker redelivery"
                    );
                    break;
                }
            }
        }
        Ok(())
    }
}
