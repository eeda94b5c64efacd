//! Broker topology: which stream a worker consumes from and where replies go.
//!
//! A shared direct exchange `E` is a JetStream stream named `E` capturing
//! `E.>`; a queue `Q` bound to it is a durable consumer `Q` filtering `E.Q`.
//! The default exchange routes straight to a queue: stream `Q` capturing `Q`.
//! Rejected requests are republished on the queue's dead-letter subject and
//! held by a second durable consumer until they age out.

use std::time::Duration;

use crate::error::WorkerError;

/// Default shared exchange name.
pub const DEFAULT_EXCHANGE: &str = "tools-exchange";

/// How long the broker waits for an ack before redelivering.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(60 * 60);

/// How long unconsumed messages, dead letters included, stay in the stream.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const DEAD_LETTER_SUFFIX: &str = "dead";

/// Exchange a queue is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Shared direct exchange; routing key is the queue name.
    Shared(String),

    /// Broker default exchange; the queue name is the subject.
    Default,
}

/// Queue/exchange declaration for one tool worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: Exchange,
    pub queue: String,

    /// Maximum unacknowledged deliveries; `None` leaves the server default.
    pub prefetch: Option<i64>,

    /// Redelivery timeout for an unacknowledged delivery. The connection
    /// reports progress on outstanding deliveries well before it expires.
    pub ack_wait: Duration,

    /// Retention limit for messages nobody has consumed.
    pub max_age: Duration,
}

impl Topology {
    /// Queue bound to a shared direct exchange.
    pub fn shared(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: Exchange::Shared(exchange.into()),
            queue: queue.into(),
            prefetch: None,
            ack_wait: DEFAULT_ACK_WAIT,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    /// Queue on the default exchange.
    pub fn default_exchange(queue: impl Into<String>) -> Self {
        Self {
            exchange: Exchange::Default,
            queue: queue.into(),
            prefetch: None,
            ack_wait: DEFAULT_ACK_WAIT,
            max_age: DEFAULT_MAX_AGE,
        }
    }

    pub fn with_prefetch(mut self, prefetch: i64) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Interval at which outstanding deliveries are reported as in progress.
    pub fn keepalive_interval(&self) -> Duration {
        (self.ack_wait / 2).max(Duration::from_millis(1))
    }

    /// JetStream stream backing the exchange.
    pub fn stream_name(&self) -> &str {
        match &self.exchange {
            Exchange::Shared(exchange) => exchange,
            Exchange::Default => &self.queue,
        }
    }

    /// Subjects captured by the stream.
    pub fn stream_subjects(&self) -> Vec<String> {
        match &self.exchange {
            Exchange::Shared(exchange) => vec![format!("{}.>", exchange)],
            Exchange::Default => vec![self.queue.clone(), self.dead_letter_subject()],
        }
    }

    /// Subject requests for this queue are published on.
    pub fn routing_subject(&self) -> String {
        match &self.exchange {
            Exchange::Shared(exchange) => format!("{}.{}", exchange, self.queue),
            Exchange::Default => self.queue.clone(),
        }
    }

    /// Subject rejected requests are republished on.
    pub fn dead_letter_subject(&self) -> String {
        format!("{}.{}", self.routing_subject(), DEAD_LETTER_SUFFIX)
    }

    /// Durable consumer holding dead letters for inspection.
    pub fn dead_letter_consumer(&self) -> String {
        format!("{}-{}", self.queue, DEAD_LETTER_SUFFIX)
    }

    /// Subject a reply for `reply_to` is published on.
    pub fn reply_subject(&self, reply_to: &str) -> String {
        match &self.exchange {
            Exchange::Shared(exchange) => format!("{}.{}", exchange, reply_to),
            Exchange::Default => reply_to.to_string(),
        }
    }

    /// Validate names before any broker I/O.
    pub fn validate(&self) -> Result<(), WorkerError> {
        validate_name("queue", &self.queue)?;
        if let Exchange::Shared(exchange) = &self.exchange {
            validate_name("exchange", exchange)?;
        }
        if let Some(prefetch) = self.prefetch {
            if prefetch < 1 {
                return Err(WorkerError::Config(format!(
                    "prefetch must be at least 1, got {}",
                    prefetch
                )));
            }
        }
        if self.ack_wait < Duration::from_secs(1) {
            return Err(WorkerError::Config(format!(
                "ack wait must be at least one second, got {:?}",
                self.ack_wait
            )));
        }
        if self.max_age < self.ack_wait {
            return Err(WorkerError::Config(format!(
                "max age {:?} is shorter than ack wait {:?}",
                self.max_age, self.ack_wait
            )));
        }
        Ok(())
    }
}

/// Stream and durable consumer names share these restrictions.
fn validate_name(what: &str, name: &str) -> Result<(), WorkerError> {
    if name.is_empty() {
        return Err(WorkerError::Config(format!("{} name must not be empty", what)));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '.' | '*' | '>' | '/' | '\\') || c.is_whitespace())
    {
        return Err(WorkerError::Config(format!(
            "{} name '{}' contains invalid character {:?}",
            what, name, c
        )));
    }
    Ok(())
}

/// NATS subject matching with `*` (one token) and `>` (one or more trailing tokens).
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
