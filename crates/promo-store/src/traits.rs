use std::collections::BTreeMap;

use promo_types::{Claim, FeatureFlag, Group, GroupId, Promotion, PromotionId, User, UserId};

use crate::error::{StoreError, StoreResult};
use crate::tx::{Transaction, TxScope};

/// Keyed storage for every entity of the credit economy.
///
/// All implementations must satisfy these invariants:
/// - Reads outside a transaction see committed state only.
/// - `transact` is all-or-nothing: on `Err` no staged write is applied.
/// - Two transactions whose scopes overlap never interleave on the shared
///   entities; disjoint scopes may run in parallel.
/// - Lock acquisition follows one global order, so transactions cannot
///   deadlock against each other.
/// - Promotion ids are allocated monotonically and never reused.
pub trait EntityStore: Send + Sync {
    /// Look up a user by id.
    fn user(&self, id: UserId) -> StoreResult<Option<User>>;

    fn promotion(&self, id: PromotionId) -> StoreResult<Option<Promotion>>;

    fn group(&self, id: GroupId) -> StoreResult<Option<Group>>;

    /// Whether `user` has already been rewarded for `promotion`.
    fn has_claim(&self, user: UserId, promotion: PromotionId) -> StoreResult<bool>;

    fn claim(&self, user: UserId, promotion: PromotionId) -> StoreResult<Option<Claim>>;

    /// Every user, ordered by id.
    fn users(&self) -> StoreResult<Vec<User>>;

    /// Every user id, ordered. Cheaper than [`EntityStore::users`] when the
    /// caller locks users one at a time.
    fn user_ids(&self) -> StoreResult<Vec<UserId>>;

    /// Every promotion, ordered by id.
    fn promotions(&self) -> StoreResult<Vec<Promotion>>;

    /// Promotions with budget left, ordered by id.
    fn funded_promotions(&self) -> StoreResult<Vec<Promotion>> {
        Ok(self
            .promotions()?
            .into_iter()
            .filter(Promotion::is_funded)
            .collect())
    }

    /// Claims made by one user, ordered by promotion id.
    fn claims_for(&self, user: UserId) -> StoreResult<Vec<Claim>>;

    /// Every group, ordered by id.
    fn groups(&self) -> StoreResult<Vec<Group>>;

    /// Current value of a feature flag. Unset flags read as enabled.
    fn flag(&self, flag: FeatureFlag) -> StoreResult<bool>;

    /// Every flag that has been explicitly set.
    fn flags(&self) -> StoreResult<BTreeMap<String, bool>>;

    fn set_flag(&self, flag: FeatureFlag, enabled: bool) -> StoreResult<()>;

    /// Lock `scope`, stage its entities, run `f`, and commit on `Ok`.
    ///
    /// The closure must not block on anything that may itself wait for a
    /// transaction; it runs with the scope's locks held.
    fn transact<R, E, F>(&self, scope: &TxScope, f: F) -> Result<R, E>
    where
        Self: Sized,
        E: From<StoreError>,
        F: FnOnce(&mut Transaction<'_>) -> Result<R, E>;
}
