//! Deliveries, delivery tags and the job envelope.

use bytes::Bytes;
use std::fmt;

use crate::error::WorkerError;

/// Message header carrying the caller's correlation id.
pub const CORRELATION_ID_HEADER: &str = "Correlation-Id";

/// Message header naming the reply destination.
pub const REPLY_TO_HEADER: &str = "Reply-To";

/// Handle for one unacknowledged message, scoped to a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as received from the broker, before validation.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub body: Bytes,
}

/// A validated job: where to reply, how to correlate, and the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEnvelope {
    pub correlation_id: String,
    pub reply_to: String,
    pub body: Bytes,
}

impl JobEnvelope {
    /// Validate the envelope metadata of a delivery.
    pub fn from_delivery(delivery: &Delivery) -> Result<Self, WorkerError> {
        let correlation_id = required(delivery.correlation_id.as_deref(), CORRELATION_ID_HEADER)?;
        let reply_to = required(delivery.reply_to.as_deref(), REPLY_TO_HEADER)?;

        Ok(Self {
            correlation_id: correlation_id.to_string(),
            reply_to: reply_to.to_string(),
            body: delivery.body.clone(),
        })
    }
}

fn required<'a>(value: Option<&'a str>, header: &str) -> Result<&'a str, WorkerError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(WorkerError::Decode(format!("missing {} header", header))),
    }
}
