/// Errors reported by a delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The recipient can never be reached again (blocked the bot, bot
    /// removed from the group).
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    /// Worth trying again later (rate limit, network hiccup).
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
