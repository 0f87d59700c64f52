use promo_store::StoreError;
use promo_types::{ChannelId, FeatureFlag, PromotionId, QuotaKind, TypeError, UserId};

/// Errors produced by engine operations.
///
/// Every variant except `ExternalDeliveryFailed` means the operation left
/// the store untouched.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("user {user} already claimed promotion {promotion}")]
    AlreadyClaimed { user: UserId, promotion: PromotionId },

    #[error("promotion {0} has no budget left")]
    BudgetExhausted(PromotionId),

    #[error("insufficient credits: needed {needed}, available {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error("{quota} quota exhausted: requested {requested}, available {available}")]
    QuotaExhausted {
        quota: QuotaKind,
        requested: u32,
        available: u32,
    },

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("promotion {0} not found")]
    PromotionNotFound(PromotionId),

    #[error("user {0} is banned")]
    Banned(UserId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Informational: the ledger change succeeded but a message did not go out.
    #[error("external delivery failed: {0}")]
    ExternalDeliveryFailed(String),

    #[error("feature {0} is disabled")]
    FeatureDisabled(FeatureFlag),

    #[error("premium subscription required")]
    PremiumRequired,

    #[error("user {0} is not an admin")]
    NotAdmin(UserId),

    #[error("no active groups available")]
    NoGroupsAvailable,

    #[error("user {user} is not a member of channel {channel}")]
    NotAMember { user: UserId, channel: ChannelId },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<TypeError> for EngineError {
    fn from(err: TypeError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
