//! Messaging boundaries for the Promo Credit Ledger.
//!
//! The engine never talks to the messaging platform. This crate defines the
//! two collaborators it needs, [`DeliveryChannel`] and [`MembershipOracle`],
//! and the flows that combine an engine call with delivery:
//!
//! - [`Notifier`]: fire-and-forget owner notifications
//! - [`BatchSender`]: paced sends that tolerate individual failures
//! - [`Workflows`]: verified claims, group shares, image and admin broadcasts
//!
//! All delivery happens after the engine transaction has committed.

pub mod batch;
pub mod error;
pub mod message;
pub mod notifier;
pub mod traits;
pub mod workflows;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchReport, BatchSender};
pub use error::{DeliveryError, DeliveryResult};
pub use message::{Message, Recipient};
pub use notifier::Notifier;
pub use traits::{DeliveryChannel, LogChannel, MembershipOracle, TrustingOracle};
pub use workflows::{
    AdminBroadcastReport, GroupShareReport, ImageBroadcastReport, ReportReceipt, Workflows,
};
