use async_trait::async_trait;
use promo_types::{ChannelId, UserId};
use tracing::info;

use crate::error::DeliveryResult;
use crate::message::{Message, Recipient};

/// Outbound messaging to users and groups.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, recipient: Recipient, message: &Message) -> DeliveryResult<()>;
}

/// Answers whether a user has joined an external channel.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn is_member(&self, channel: ChannelId, user: UserId) -> DeliveryResult<bool>;
}

/// Writes every message to the log instead of a platform. Used for dry runs.
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    async fn send(&self, recipient: Recipient, message: &Message) -> DeliveryResult<()> {
        info!(
            %recipient,
            image = message.image.as_deref().unwrap_or("-"),
            text = %message.text,
            "deliver"
        );
        Ok(())
    }
}

/// Treats every user as a member of every channel.
pub struct TrustingOracle;

#[async_trait]
impl MembershipOracle for TrustingOracle {
    async fn is_member(&self, _channel: ChannelId, _user: UserId) -> DeliveryResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_channel_accepts_everything() {
        let channel = LogChannel;
        channel
            .send(Recipient::User(UserId(1)), &Message::text("hi"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn trusting_oracle_says_yes() {
        let oracle = TrustingOracle;
        assert!(oracle.is_member(ChannelId(-1), UserId(1)).await.unwrap());
    }
}
