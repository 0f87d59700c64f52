//! Recording collaborators for tests.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use promo_types::{ChannelId, UserId};

use crate::error::{DeliveryError, DeliveryResult};
use crate::message::{Message, Recipient};
use crate::traits::{DeliveryChannel, MembershipOracle};

#[derive(Default)]
pub struct MockChannel {
    permanent: BTreeSet<Recipient>,
    transient: BTreeSet<Recipient>,
    log: Mutex<Vec<(Recipient, Message)>>,
}

impl MockChannel {
    pub fn failing_permanently(recipients: impl IntoIterator<Item = Recipient>) -> Self {
        Self {
            permanent: recipients.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_transient(mut self, recipients: impl IntoIterator<Item = Recipient>) -> Self {
        self.transient.extend(recipients);
        self
    }

    /// Recipients of successful sends, in order.
    pub fn sent(&self) -> Vec<Recipient> {
        self.log.lock().unwrap().iter().map(|(r, _)| *r).collect()
    }

    pub fn messages(&self) -> Vec<(Recipient, Message)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for MockChannel {
    async fn send(&self, recipient: Recipient, message: &Message) -> DeliveryResult<()> {
        if self.permanent.contains(&recipient) {
            return Err(DeliveryError::Permanent(format!("{recipient} blocked the bot")));
        }
        if self.transient.contains(&recipient) {
            return Err(DeliveryError::Transient("rate limited".into()));
        }
        self.log.lock().unwrap().push((recipient, message.clone()));
        Ok(())
    }
}

/// Knows a fixed set of memberships; optionally fails every lookup.
#[derive(Default)]
pub struct MockOracle {
    pub members: BTreeSet<(ChannelId, UserId)>,
    pub unavailable: bool,
}

#[async_trait]
impl MembershipOracle for MockOracle {
    async fn is_member(&self, channel: ChannelId, user: UserId) -> DeliveryResult<bool> {
        if self.unavailable {
            return Err(DeliveryError::Transient("platform unavailable".into()));
        }
        Ok(self.members.contains(&(channel, user)))
    }
}
