//! Entity storage for the Promo Credit Ledger.
//!
//! The store holds five kinds of state: users, promotions, claims, groups and
//! feature flags. It never interprets balances or budgets; it only guarantees
//! that a group of reads and writes over several entities happens as one
//! indivisible step.
//!
//! # Transactions
//!
//! Every mutation goes through [`EntityStore::transact`]. The caller names the
//! entities it will touch in a [`TxScope`]; the store locks them, stages
//! copies into a [`Transaction`], runs the closure, and commits the staged
//! changes only if the closure returns `Ok`.
//!
//! # Design Rules
//!
//! 1. Entity locks are striped by id and always taken in one global order:
//!    users, then promotions, then groups, ascending stripe within each kind.
//! 2. The table lock is never held while waiting for an entity lock.
//! 3. A failed transaction leaves no trace, apart from a burned promotion id.
//! 4. A claim and the claimant's `completed_task_ids` entry are written together.
//! 5. No lock is held across an `.await`; the store API is synchronous.

pub mod error;
pub mod memory;
pub mod snapshot;
pub mod traits;
pub mod tx;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryEntityStore;
pub use snapshot::Snapshot;
pub use traits::EntityStore;
pub use tx::{ChangeSet, Transaction, TxScope};
