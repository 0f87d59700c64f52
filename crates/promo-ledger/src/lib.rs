//! Credit ledger and promotion-task matching engine.
//!
//! [`CreditEngine`] owns an [`promo_store::EntityStore`] and an
//! [`EngineConfig`], and implements every balance-affecting operation of the
//! promotion bot on top of them:
//!
//! - Ledger core: [`CreditEngine::credit`], [`CreditEngine::debit`]
//! - Claims: [`CreditEngine::try_claim`]
//! - Promotion lifecycle: [`CreditEngine::create_promotion`] and saved payloads
//! - Task selection: [`CreditEngine::pick_task`]
//! - Quotas: [`CreditEngine::consume_quota`], image broadcasts, group shares
//! - Referrals and signup: [`CreditEngine::register_referral`], [`CreditEngine::register_user`]
//! - Leaderboard: [`CreditEngine::top_n`]
//! - Scheduled resets: [`CreditEngine::daily_reset`], [`CreditEngine::weekly_reset`]
//! - Groups, feature flags and admin operations
//! - Closed dispatch: [`Action`] in, [`ActionOutcome`] out
//!
//! Each operation is one store transaction. Nothing here performs I/O or
//! awaits; delivery to the messaging platform happens in `promo-delivery`
//! after the transaction has committed.

pub mod action;
pub mod admin;
pub mod claim;
pub mod config;
pub mod engine;
pub mod error;
pub mod groups;
pub mod leaderboard;
pub mod ledger;
pub mod promotion;
pub mod quota;
pub mod referral;
pub mod reset;
pub mod selector;

pub use action::{Action, ActionOutcome};
pub use admin::{SystemStats, UserStats};
pub use claim::ClaimReceipt;
pub use config::{DeliveryConfig, EngineConfig, QuotaConfig, RewardConfig};
pub use engine::CreditEngine;
pub use error::{EngineError, EngineResult};
pub use groups::GroupRegistration;
pub use leaderboard::LeaderboardEntry;
pub use quota::{BroadcastReservation, GroupShareReservation};
pub use referral::{IgnoreReason, ReferralOutcome, Registration};
pub use reset::ResetReport;
