//! Delivery Sender: hands one message to the transport.

use std::sync::Arc;

use tracing::{debug, warn};

use forgecrm_core::{EmailAddress, RecipientId};

use super::message::Message;
use super::transport::{MailTransport, OutboundMail, TransportError};
use crate::jobs::types::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid delivery address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("rate limited after {attempts} attempt(s): {message}")]
    RateLimited { attempts: u32, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub recipient_id: RecipientId,
    pub delivered_to: String,
    pub attempts: u32,
}

/// Validates the address, sends, and retries only rate-limited sends.
///
/// The transport may not deduplicate; callers must not deliver a message for
/// a recipient that already has a `sent` outcome.
#[derive(Clone)]
pub struct DeliverySender {
    transport: Arc<dyn MailTransport>,
    retry: RetryPolicy,
}

impl DeliverySender {
    pub fn new(transport: Arc<dyn MailTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub async fn deliver(&self, message: &Message) -> Result<DeliveryReceipt, DeliveryError> {
        let address = EmailAddress::parse(&message.to).map_err(|e| DeliveryError::InvalidAddress {
            address: message.to.clone(),
            reason: e.to_string(),
        })?;

        let mail = OutboundMail {
            recipient: address.to_string(),
            subject: message.subject.clone(),
            body: message.body.clone(),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.send(&mail).await {
                Ok(()) => {
                    debug!(recipient = %message.recipient_id, to = %address, attempt, "delivered");
                    return Ok(DeliveryReceipt {
                        recipient_id: message.recipient_id.clone(),
                        delivered_to: address.to_string(),
                        attempts: attempt,
                    });
                }
                Err(TransportError::RateLimited(msg)) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        recipient = %message.recipient_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "rate limited; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(TransportError::RateLimited(msg)) => {
                    return Err(DeliveryError::RateLimited {
                        attempts: attempt,
                        message: msg,
                    });
                }
                Err(TransportError::Rejected(msg)) => return Err(DeliveryError::Rejected(msg)),
                Err(TransportError::Unavailable(msg)) => return Err(DeliveryError::Transport(msg)),
            }
        }
    }
}
