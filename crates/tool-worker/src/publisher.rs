//! Reply publishing and delivery acknowledgement.
//!
//! A [`Resolution`] is what a pool worker hands back for one delivery. The
//! [`ReplyPublisher`] turns it into broker calls on the connection task:
//! publish then ack on success, nack without requeue on failure.

use bytes::Bytes;

use crate::broker::{BrokerChannel, Topology};
use crate::envelope::DeliveryTag;
use crate::error::WorkerError;

/// Outcome of processing one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Publish `body` to `reply_to`, then ack.
    Reply {
        reply_to: String,
        correlation_id: String,
        body: Bytes,
    },

    /// Nack without requeue; nothing is published.
    Reject { reason: String },
}

/// Terminal instruction for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tag: DeliveryTag,
    pub outcome: Outcome,
}

impl Resolution {
    pub fn reply(
        tag: DeliveryTag,
        reply_to: impl Into<String>,
        correlation_id: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            tag,
            outcome: Outcome::Reply {
                reply_to: reply_to.into(),
                correlation_id: correlation_id.into(),
                body: body.into(),
            },
        }
    }

    pub fn reject(tag: DeliveryTag, reason: impl Into<String>) -> Self {
        Self {
            tag,
            outcome: Outcome::Reject {
                reason: reason.into(),
            },
        }
    }
}

/// Terminal action actually performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    Acked,
    Nacked,
}

/// Performs the terminal actions for deliveries.
#[derive(Debug, Clone)]
pub struct ReplyPublisher {
    topology: Topology,
    tool: &'static str,
}

impl ReplyPublisher {
    pub fn new(topology: Topology, tool: &'static str) -> Self {
        Self { topology, tool }
    }

    /// Publish the reply (if any) and terminate the delivery.
    ///
    /// Errors are connection errors from ack/nack only; a failed publish is
    /// logged and turned into a nack.
    pub async fn resolve<C: BrokerChannel>(
        &self,
        channel: &mut C,
        resolution: Resolution,
    ) -> Result<Terminated, WorkerError> {
        let tag = resolution.tag;

        match resolution.outcome {
            Outcome::Reply {
                reply_to,
                correlation_id,
                body,
            } => {
                let subject = self.topology.reply_subject(&reply_to);
                match channel.publish(&subject, &correlation_id, body).await {
                    Ok(()) => {
                        tracing::info!(
                            tool = self.tool,
                            correlation_id = %correlation_id,
                            reply_to = %reply_to,
                            "Sent reply"
                        );
                        channel.ack(tag).await?;
                        Ok(Terminated::Acked)
                    }
                    Err(e) => {
                        tracing::error!(
                            tool = self.tool,
                            correlation_id = %correlation_id,
                            delivery_tag = %tag,
                            error = %e,
                            "Failed to publish reply, rejecting delivery"
                        );
                        channel.nack(tag, false).await?;
                        Ok(Terminated::Nacked)
                    }
                }
            }
            Outcome::Reject { reason } => {
                tracing::warn!(
                    tool = self.tool,
                    delivery_tag = %tag,
                    reason = %reason,
                    "Rejecting delivery without requeue"
                );
                channel.nack(tag, false).await?;
                Ok(Terminated::Nacked)
            }
        }
    }
}
