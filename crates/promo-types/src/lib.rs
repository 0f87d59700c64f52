//! Foundation types for the Promo Credit Ledger.
//!
//! This crate provides the records and identifiers shared by every other
//! crate in the workspace. It holds no behaviour beyond small, pure helpers
//! (premium activity checks, reward multipliers, payload validation).
//!
//! # Key Types
//!
//! - [`UserId`], [`PromotionId`], [`GroupId`], [`ChannelId`]: opaque identifiers
//! - [`User`]: balances, quotas, saved promotion payloads, completed tasks
//! - [`Promotion`]: a funded task with a remaining budget
//! - [`Claim`]: the permanent "user was rewarded for promotion" record
//! - [`Group`]: a chat group the bot can deliver group shares to
//! - [`QuotaKind`]: the consumable per-day allowances on a user

pub mod error;
pub mod flags;
pub mod group;
pub mod ids;
pub mod promotion;
pub mod quota;
pub mod user;

pub use error::TypeError;
pub use flags::FeatureFlag;
pub use group::Group;
pub use ids::{ChannelId, GroupId, PromotionId, UserId};
pub use promotion::{Claim, NormalPromo, Promotion, PromotionKind, PromotionPayload};
pub use quota::QuotaKind;
pub use user::User;
