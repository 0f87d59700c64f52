use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::message::{Message, Recipient};
use crate::traits::DeliveryChannel;

/// Fire-and-forget notifications. Each send runs on its own task; a failure
/// is logged and dropped, never retried.
#[derive(Clone)]
pub struct Notifier {
    channel: Arc<dyn DeliveryChannel>,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Notifier {
    pub fn new(channel: Arc<dyn DeliveryChannel>) -> Self {
        Self {
            channel,
            pending: Arc::default(),
        }
    }

    /// Spawn the send on the current tokio runtime. Without a runtime the
    /// notification is logged and skipped.
    pub fn notify(&self, recipient: Recipient, message: Message) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(%recipient, "no async runtime, notification skipped");
            return;
        };
        let channel = Arc::clone(&self.channel);
        let task = runtime.spawn(async move {
            match channel.send(recipient, &message).await {
                Ok(()) => debug!(%recipient, "notification sent"),
                Err(err) => warn!(%recipient, error = %err, "notification dropped"),
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }

    /// Wait for every notification spawned so far.
    pub async fn flush(&self) {
        let tasks = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "notification task panicked");
            }
        }
    }
}
