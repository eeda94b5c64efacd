//! NATS JetStream broker channel.

use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, Consumer},
    context::GetStreamErrorKind,
    stream::{RetentionPolicy, StorageType},
    AckKind, Context, ErrorCode,
};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;

use super::topology::{subject_matches, Topology};
use super::BrokerChannel;
use crate::envelope::{Delivery, DeliveryTag, CORRELATION_ID_HEADER, REPLY_TO_HEADER};
use crate::error::WorkerError;

/// Broker channel over a single NATS connection.
pub struct NatsChannel {
    /// Core client, used for reply publishing.
    client: async_nats::Client,

    /// JetStream context.
    js: Context,

    /// Message stream of the durable consumer, once set up.
    messages: Option<pull::Stream>,

    /// Subject rejected requests are republished on, once set up.
    dead_letter_subject: Option<String>,

    /// Received but not yet acknowledged messages.
    pending: HashMap<DeliveryTag, Pending>,

    /// Tag assignment and in-flight stream sequences.
    in_flight: InFlight,
}

struct Pending {
    sequence: Option<u64>,
    message: jetstream::Message,
}

/// Tracks which stream messages are in flight on this connection.
///
/// A message the server redelivers while its first delivery is still pending
/// is not handed out again.
#[derive(Debug)]
struct InFlight {
    next_tag: u64,
    sequences: HashMap<u64, DeliveryTag>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            next_tag: 1,
            sequences: HashMap::new(),
        }
    }

    /// Assign a tag, or `None` when `sequence` is already in flight.
    fn admit(&mut self, sequence: Option<u64>) -> Option<DeliveryTag> {
        if let Some(seq) = sequence {
            if self.sequences.contains_key(&seq) {
                return None;
            }
        }
        let tag = DeliveryTag(self.next_tag);
        self.next_tag += 1;
        if let Some(seq) = sequence {
            self.sequences.insert(seq, tag);
        }
        Some(tag)
    }

    fn release(&mut self, sequence: Option<u64>) {
        if let Some(seq) = sequence {
            self.sequences.remove(&seq);
        }
    }

    fn len(&self) -> usize {
        self.sequences.len()
    }
}

/// Stream backing the topology. Interest retention drops a message once every
/// consumer bound to its subject has acknowledged it, and drops messages no
/// consumer is bound to.
fn stream_config(topology: &Topology) -> jetstream::stream::Config {
    jetstream::stream::Config {
        name: topology.stream_name().to_string(),
        subjects: topology.stream_subjects(),
        storage: StorageType::File,
        retention: RetentionPolicy::Interest,
        max_age: topology.max_age,
        ..Default::default()
    }
}

/// Durable consumer standing in for the request queue.
fn consumer_config(topology: &Topology) -> pull::Config {
    pull::Config {
        durable_name: Some(topology.queue.clone()),
        filter_subject: topology.routing_subject(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: topology.ack_wait,
        max_ack_pending: topology.prefetch.unwrap_or_default(),
        ..Default::default()
    }
}

/// Durable consumer that keeps dead letters in the stream until inspected.
fn dead_letter_consumer_config(topology: &Topology) -> pull::Config {
    pull::Config {
        durable_name: Some(topology.dead_letter_consumer()),
        filter_subject: topology.dead_letter_subject(),
        ack_policy: AckPolicy::Explicit,
        ..Default::default()
    }
}

fn is_stream_not_found(kind: &GetStreamErrorKind) -> bool {
    matches!(kind, GetStreamErrorKind::JetStream(e) if e.error_code() == ErrorCode::STREAM_NOT_FOUND)
}

/// Whether a consumer lookup failed because the consumer does not exist.
fn is_consumer_not_found(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(js) = e.downcast_ref::<jetstream::Error>() {
            return js.error_code() == ErrorCode::CONSUMER_NOT_FOUND;
        }
        current = e.source();
    }
    err.to_string().to_lowercase().contains("consumer not found")
}

impl NatsChannel {
    /// Connect to NATS.
    pub async fn connect(nats_url: &str, client_name: &str) -> Result<Self, WorkerError> {
        let client = async_nats::ConnectOptions::new()
            .name(client_name)
            .connect(nats_url)
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to connect to {}: {}", nats_url, e)))?;
        let js = jetstream::new(client.clone());

        tracing::info!(url = %nats_url, "Connected to NATS");

        Ok(Self {
            client,
            js,
            messages: None,
            dead_letter_subject: None,
            pending: HashMap::new(),
            in_flight: InFlight::new(),
        })
    }

    fn take_pending(&mut self, tag: DeliveryTag) -> Result<jetstream::Message, WorkerError> {
        let pending = self
            .pending
            .remove(&tag)
            .ok_or_else(|| WorkerError::Connection(format!("no pending message for delivery tag {}", tag)))?;
        self.in_flight.release(pending.sequence);
        Ok(pending.message)
    }
}

/// Ensure the stream backing the exchange exists and captures our subjects.
async fn ensure_stream(js: &Context, topology: &Topology) -> Result<jetstream::stream::Stream, WorkerError> {
    let name = topology.stream_name();

    match js.get_stream(name).await {
        Ok(stream) => {
            let info = &stream.cached_info().config;
            for required in [topology.routing_subject(), topology.dead_letter_subject()] {
                if !info.subjects.iter().any(|s| subject_matches(s, &required)) {
                    return Err(WorkerError::Topology(format!(
                        "stream '{}' exists with subjects {:?} which do not capture '{}'",
                        name, info.subjects, required
                    )));
                }
            }
            if info.retention != RetentionPolicy::Interest {
                tracing::warn!(
                    stream = %name,
                    retention = ?info.retention,
                    "Existing stream does not use interest retention, acked messages are kept"
                );
            }
            tracing::debug!(stream = %name, "Using existing NATS stream");
            Ok(stream)
        }
        Err(e) if is_stream_not_found(&e.kind()) => {
            let stream = js.create_stream(stream_config(topology)).await.map_err(|e| {
                WorkerError::Topology(format!("Failed to create stream '{}': {}", name, e))
            })?;
            tracing::info!(stream = %name, "Created NATS stream");
            Ok(stream)
        }
        Err(e) => Err(WorkerError::Connection(format!(
            "Failed to look up stream '{}': {}",
            name, e
        ))),
    }
}

/// Create or get a durable consumer, checking its filter subject.
async fn ensure_consumer(
    stream: &jetstream::stream::Stream,
    config: pull::Config,
) -> Result<Consumer<pull::Config>, WorkerError> {
    let name = config.durable_name.clone().unwrap_or_default();

    match stream.get_consumer::<pull::Config>(&name).await {
        Ok(consumer) => {
            let existing = &consumer.cached_info().config;
            if existing.filter_subject != config.filter_subject {
                return Err(WorkerError::Topology(format!(
                    "consumer '{}' exists filtering '{}', expected '{}'",
                    name, existing.filter_subject, config.filter_subject
                )));
            }
            if existing.ack_wait != config.ack_wait && config.ack_wait > std::time::Duration::ZERO {
                tracing::warn!(
                    consumer = %name,
                    existing = ?existing.ack_wait,
                    configured = ?config.ack_wait,
                    "Existing consumer keeps its ack wait"
                );
            }
            tracing::debug!(consumer = %name, "Using existing NATS consumer");
            Ok(consumer)
        }
        Err(e) if is_consumer_not_found(e.as_ref()) => {
            let consumer = stream.create_consumer(config).await.map_err(|e| {
                WorkerError::Topology(format!("Failed to create consumer '{}': {}", name, e))
            })?;
            tracing::info!(consumer = %name, "Created NATS consumer");
            Ok(consumer)
        }
        Err(e) => Err(WorkerError::Connection(format!(
            "Failed to look up consumer '{}': {}",
            name, e
        ))),
    }
}

/// Republish a rejected request on the dead-letter subject.
async fn dead_letter(client: &async_nats::Client, subject: &str, tag: DeliveryTag, message: &jetstream::Message) {
    let headers = message.headers.clone().unwrap_or_default();
    if let Err(e) = client
        .publish_with_headers(subject.to_string(), headers, message.payload.clone())
        .await
    {
        tracing::warn!(delivery_tag = %tag, subject = %subject, error = %e, "Failed to dead-letter message");
    }
}

fn header_value(headers: Option<&HeaderMap>, name: &str) -> Option<String> {
    headers
        .and_then(|h| h.get(name))
        .map(|v| v.as_str().to_string())
}

#[async_trait]
impl BrokerChannel for NatsChannel {
    async fn setup(&mut self, topology: &Topology) -> Result<(), WorkerError> {
        topology.validate()?;

        let stream = ensure_stream(&self.js, topology).await?;
        ensure_consumer(&stream, dead_letter_consumer_config(topology)).await?;
        let consumer = ensure_consumer(&stream, consumer_config(topology)).await?;

        let messages = consumer.messages().await.map_err(|e| {
            WorkerError::Connection(format!("Failed to start consuming '{}': {}", topology.queue, e))
        })?;
        self.messages = Some(messages);
        self.dead_letter_subject = Some(topology.dead_letter_subject());

        Ok(())
    }

    async fn next_delivery(&mut self) -> Option<Result<Delivery, WorkerError>> {
        loop {
            let Some(messages) = self.messages.as_mut() else {
                return Some(Err(WorkerError::Connection(
                    "next_delivery called before setup".to_string(),
                )));
            };

            let msg = match messages.next().await? {
                Ok(msg) => msg,
                Err(e) => {
                    return Some(Err(WorkerError::Connection(format!(
                        "Failed to receive message: {}",
                        e
                    ))))
                }
            };

            let sequence = msg.info().ok().map(|info| info.stream_sequence);
            let Some(tag) = self.in_flight.admit(sequence) else {
                tracing::debug!(
                    stream_sequence = ?sequence,
                    in_flight = self.in_flight.len(),
                    "Redelivery of a message still in flight, skipping"
                );
                continue;
            };

            let delivery = Delivery {
                tag,
                correlation_id: header_value(msg.headers.as_ref(), CORRELATION_ID_HEADER),
                reply_to: header_value(msg.headers.as_ref(), REPLY_TO_HEADER),
                body: msg.payload.clone(),
            };
            self.pending.insert(tag, Pending { sequence, message: msg });
            return Some(Ok(delivery));
        }
    }

    async fn publish(
        &mut self,
        subject: &str,
        correlation_id: &str,
        body: Bytes,
    ) -> Result<(), WorkerError> {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, correlation_id);

        self.client
            .publish_with_headers(subject.to_string(), headers, body)
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to publish to {}: {}", subject, e)))
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), WorkerError> {
        let msg = self.take_pending(tag)?;
        msg.ack()
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to ack message: {}", e)))
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), WorkerError> {
        let msg = self.take_pending(tag)?;
        let kind = if requeue {
            AckKind::Nak(None)
        } else {
            if let Some(subject) = &self.dead_letter_subject {
                dead_letter(&self.client, subject, tag, &msg).await;
            }
            AckKind::Term
        };
        msg.ack_with(kind)
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to nack message: {}", e)))
    }

    async fn in_progress(&mut self, tag: DeliveryTag) -> Result<(), WorkerError> {
        let Some(pending) = self.pending.get(&tag) else {
            tracing::debug!(delivery_tag = %tag, "No pending message to keep alive");
            return Ok(());
        };
        pending
            .message
            .ack_with(AckKind::Progress)
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to report progress: {}", e)))
    }

    async fn close(&mut self) -> Result<(), WorkerError> {
        self.messages = None;
        if !self.pending.is_empty() {
            tracing::warn!(
                unresolved = self.pending.len(),
                "Closing with unacknowledged messages, they will be redelivered"
            );
            self.pending.clear();
            self.in_flight = InFlight::new();
        }
        self.client
            .flush()
            .await
            .map_err(|e| WorkerError::Connection(format!("Failed to flush: {}", e)))
    }
}
