use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use promo_types::{Claim, Group, GroupId, Promotion, PromotionId, PromotionPayload, User, UserId};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// TxScope
// ---------------------------------------------------------------------------

/// The set of entities a transaction is allowed to read and write.
///
/// Ids may be listed in any order and more than once; the store sorts and
/// deduplicates them before locking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxScope {
    users: BTreeSet<UserId>,
    promotions: BTreeSet<PromotionId>,
    groups: BTreeSet<GroupId>,
}

impl TxScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, id: UserId) -> Self {
        self.users.insert(id);
        self
    }

    pub fn users(mut self, ids: impl IntoIterator<Item = UserId>) -> Self {
        self.users.extend(ids);
        self
    }

    pub fn promotion(mut self, id: PromotionId) -> Self {
        self.promotions.insert(id);
        self
    }

    pub fn group(mut self, id: GroupId) -> Self {
        self.groups.insert(id);
        self
    }

    pub fn user_ids(&self) -> impl Iterator<Item = &UserId> {
        self.users.iter()
    }

    pub fn promotion_ids(&self) -> impl Iterator<Item = &PromotionId> {
        self.promotions.iter()
    }

    pub fn group_ids(&self) -> impl Iterator<Item = &GroupId> {
        self.groups.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.promotions.is_empty() && self.groups.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Staged
// ---------------------------------------------------------------------------

/// A staged copy of one entity: what the store held when the transaction
/// began, and whether the transaction changed it.
#[derive(Debug)]
struct Staged<T> {
    value: Option<T>,
    dirty: bool,
}

impl<T> Staged<T> {
    fn loaded(value: Option<T>) -> Self {
        Self {
            value,
            dirty: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// Everything a successful transaction writes back.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub users: Vec<User>,
    pub promotions: Vec<Promotion>,
    pub claims: Vec<Claim>,
    pub groups: Vec<Group>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.promotions.is_empty()
            && self.claims.is_empty()
            && self.groups.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Staging area handed to a [`crate::EntityStore::transact`] closure.
///
/// Reads return the copy taken after the scope was locked; writes only touch
/// the copies. Nothing reaches the store unless the closure returns `Ok`.
#[derive(Debug)]
pub struct Transaction<'a> {
    users: BTreeMap<UserId, Staged<User>>,
    promotions: BTreeMap<PromotionId, Staged<Promotion>>,
    groups: BTreeMap<GroupId, Staged<Group>>,
    new_promotions: Vec<Promotion>,
    new_claims: Vec<Claim>,
    promotion_ids: &'a AtomicU64,
}

impl<'a> Transaction<'a> {
    /// Start an empty transaction. Backends call the `stage_*` methods for
    /// every scoped id before handing the transaction to the caller.
    pub fn new(promotion_ids: &'a AtomicU64) -> Self {
        Self {
            users: BTreeMap::new(),
            promotions: BTreeMap::new(),
            groups: BTreeMap::new(),
            new_promotions: Vec::new(),
            new_claims: Vec::new(),
            promotion_ids,
        }
    }

    pub fn stage_user(&mut self, id: UserId, value: Option<User>) {
        self.users.insert(id, Staged::loaded(value));
    }

    pub fn stage_promotion(&mut self, id: PromotionId, value: Option<Promotion>) {
        self.promotions.insert(id, Staged::loaded(value));
    }

    pub fn stage_group(&mut self, id: GroupId, value: Option<Group>) {
        self.groups.insert(id, Staged::loaded(value));
    }

    // ---- Users ----

    pub fn user(&self, id: UserId) -> StoreResult<Option<&User>> {
        self.users
            .get(&id)
            .map(|staged| staged.value.as_ref())
            .ok_or_else(|| StoreError::out_of_scope("user", id))
    }

    pub fn user_mut(&mut self, id: UserId) -> StoreResult<Option<&mut User>> {
        let staged = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::out_of_scope("user", id))?;
        if staged.value.is_some() {
            staged.dirty = true;
        }
        Ok(staged.value.as_mut())
    }

    /// Create a user that did not exist when the transaction began.
    pub fn insert_user(&mut self, user: User) -> StoreResult<()> {
        let id = user.id;
        let staged = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::out_of_scope("user", id))?;
        if staged.value.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "user",
                id: id.to_string(),
            });
        }
        staged.value = Some(user);
        staged.dirty = true;
        Ok(())
    }

    // ---- Promotions ----

    pub fn promotion(&self, id: PromotionId) -> StoreResult<Option<&Promotion>> {
        self.promotions
            .get(&id)
            .map(|staged| staged.value.as_ref())
            .ok_or_else(|| StoreError::out_of_scope("promotion", id))
    }

    pub fn promotion_mut(&mut self, id: PromotionId) -> StoreResult<Option<&mut Promotion>> {
        let staged = self
            .promotions
            .get_mut(&id)
            .ok_or_else(|| StoreError::out_of_scope("promotion", id))?;
        if staged.value.is_some() {
            staged.dirty = true;
        }
        Ok(staged.value.as_mut())
    }

    /// Create a promotion under a freshly allocated id. Fresh ids are not
    /// visible to any other transaction, so no lock is needed for them.
    pub fn insert_promotion(
        &mut self,
        owner_id: UserId,
        payload: PromotionPayload,
        budget: u64,
        created_at: DateTime<Utc>,
    ) -> Promotion {
        let id = PromotionId(self.promotion_ids.fetch_add(1, Ordering::SeqCst));
        let promotion = Promotion {
            id,
            owner_id,
            payload,
            initial_budget: budget,
            remaining_budget: budget,
            created_at,
        };
        self.new_promotions.push(promotion.clone());
        promotion
    }

    // ---- Claims ----

    /// Claims for a user are guarded by that user's lock, so the user must
    /// be in scope.
    pub fn has_claim(&self, user: UserId, promotion: PromotionId) -> StoreResult<bool> {
        Ok(self
            .user(user)?
            .is_some_and(|u| u.has_completed(promotion)))
    }

    /// Record a claim and mark the promotion completed for the claimant.
    pub fn insert_claim(&mut self, claim: Claim) -> StoreResult<()> {
        if self.has_claim(claim.user_id, claim.promotion_id)? {
            return Err(StoreError::AlreadyExists {
                entity: "claim",
                id: format!("{}/{}", claim.user_id, claim.promotion_id),
            });
        }
        let user = self.user_mut(claim.user_id)?.ok_or(StoreError::Missing {
            entity: "user",
            id: claim.user_id.to_string(),
        })?;
        user.completed_task_ids.insert(claim.promotion_id);
        self.new_claims.push(claim);
        Ok(())
    }

    // ---- Groups ----

    pub fn group(&self, id: GroupId) -> StoreResult<Option<&Group>> {
        self.groups
            .get(&id)
            .map(|staged| staged.value.as_ref())
            .ok_or_else(|| StoreError::out_of_scope("group", id))
    }

    pub fn group_mut(&mut self, id: GroupId) -> StoreResult<Option<&mut Group>> {
        let staged = self
            .groups
            .get_mut(&id)
            .ok_or_else(|| StoreError::out_of_scope("group", id))?;
        if staged.value.is_some() {
            staged.dirty = true;
        }
        Ok(staged.value.as_mut())
    }

    pub fn insert_group(&mut self, group: Group) -> StoreResult<()> {
        let id = group.id;
        let staged = self
            .groups
            .get_mut(&id)
            .ok_or_else(|| StoreError::out_of_scope("group", id))?;
        if staged.value.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "group",
                id: id.to_string(),
            });
        }
        staged.value = Some(group);
        staged.dirty = true;
        Ok(())
    }

    /// Consume the transaction, keeping only what changed.
    pub fn into_changes(self) -> ChangeSet {
        fn dirty<K, T>(staged: BTreeMap<K, Staged<T>>) -> Vec<T> {
            staged
                .into_values()
                .filter(|s| s.dirty)
                .filter_map(|s| s.value)
                .collect()
        }

        let mut promotions = dirty(self.promotions);
        promotions.extend(self.new_promotions);

        ChangeSet {
            users: dirty(self.users),
            promotions,
            claims: self.new_claims,
            groups: dirty(self.groups),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promo_types::NormalPromo;

    fn staged_tx(ids: &AtomicU64) -> Transaction<'_> {
        let mut tx = Transaction::new(ids);
        tx.stage_user(UserId(1), Some(User::new(UserId(1), "alice", Utc::now())));
        tx.stage_user(UserId(2), None);
        tx
    }

    #[test]
    fn reads_outside_scope_fail() {
        let ids = AtomicU64::new(1);
        let tx = staged_tx(&ids);
        assert!(matches!(
            tx.user(UserId(9)),
            Err(StoreError::OutOfScope { entity: "user", .. })
        ));
        assert!(tx.promotion(PromotionId(1)).is_err());
    }

    #[test]
    fn untouched_reads_produce_no_changes() {
        let ids = AtomicU64::new(1);
        let tx = staged_tx(&ids);
        assert!(tx.user(UserId(1)).unwrap().is_some());
        assert!(tx.into_changes().is_empty());
    }

    #[test]
    fn insert_user_requires_absence() {
        let ids = AtomicU64::new(1);
        let mut tx = staged_tx(&ids);
        tx.insert_user(User::new(UserId(2), "bob", Utc::now())).unwrap();
        let err = tx
            .insert_user(User::new(UserId(1), "alice", Utc::now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { entity: "user", .. }));
        assert_eq!(tx.into_changes().users.len(), 1);
    }

    #[test]
    fn insert_claim_marks_completion_once() {
        let ids = AtomicU64::new(1);
        let mut tx = staged_tx(&ids);
        let claim = Claim {
            user_id: UserId(1),
            promotion_id: PromotionId(4),
            reward: 1,
            claimed_at: Utc::now(),
        };
        tx.insert_claim(claim.clone()).unwrap();
        assert!(tx.has_claim(UserId(1), PromotionId(4)).unwrap());
        assert!(tx.insert_claim(claim).is_err());

        let changes = tx.into_changes();
        assert_eq!(changes.claims.len(), 1);
        assert!(changes.users[0].completed_task_ids.contains(&PromotionId(4)));
    }

    #[test]
    fn insert_promotion_allocates_monotonic_ids() {
        let ids = AtomicU64::new(5);
        let mut tx = Transaction::new(&ids);
        let payload = PromotionPayload::Normal(NormalPromo::new("t", "https://a.b"));
        let a = tx.insert_promotion(UserId(1), payload.clone(), 3, Utc::now());
        let b = tx.insert_promotion(UserId(1), payload, 3, Utc::now());
        assert_eq!(a.id, PromotionId(5));
        assert_eq!(b.id, PromotionId(6));
        assert_eq!(tx.into_changes().promotions.len(), 2);
    }
}
