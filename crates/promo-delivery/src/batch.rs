use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::message::{Message, Recipient};
use crate::traits::DeliveryChannel;

/// Tally of one paced batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub sent: usize,
    pub failed: usize,
    /// Recipients that will never accept delivery again.
    pub permanent_failures: Vec<Recipient>,
}

/// Sends one message to many recipients, one at a time, sleeping `pacing`
/// between sends. A failed send never stops the batch.
pub struct BatchSender {
    channel: Arc<dyn DeliveryChannel>,
    pacing: Duration,
}

impl BatchSender {
    pub fn new(channel: Arc<dyn DeliveryChannel>, pacing: Duration) -> Self {
        Self { channel, pacing }
    }

    pub async fn send_all(&self, recipients: &[Recipient], message: &Message) -> BatchReport {
        let mut report = BatchReport::default();
        for (i, recipient) in recipients.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            match self.channel.send(*recipient, message).await {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    warn!(%recipient, error = %err, "batch send failed");
                    report.failed += 1;
                    if err.is_permanent() {
                        report.permanent_failures.push(*recipient);
                    }
                }
            }
        }
        debug!(
            sent = report.sent,
            failed = report.failed,
            "batch finished"
        );
        report
    }
}
