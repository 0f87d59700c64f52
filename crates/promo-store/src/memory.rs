use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use promo_types::{Claim, FeatureFlag, Group, GroupId, Promotion, PromotionId, User, UserId};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::snapshot::Snapshot;
use crate::traits::EntityStore;
use crate::tx::{ChangeSet, Transaction, TxScope};

/// Stripes per entity kind unless configured otherwise.
pub const DEFAULT_STRIPES: usize = 64;

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    promotions: BTreeMap<PromotionId, Promotion>,
    claims: BTreeMap<(UserId, PromotionId), Claim>,
    groups: BTreeMap<GroupId, Group>,
}

impl Tables {
    fn apply(&mut self, changes: ChangeSet) {
        for user in changes.users {
            self.users.insert(user.id, user);
        }
        for promotion in changes.promotions {
            self.promotions.insert(promotion.id, promotion);
        }
        for claim in changes.claims {
            self.claims.insert(claim.key(), claim);
        }
        for group in changes.groups {
            self.groups.insert(group.id, group);
        }
    }
}

/// One array of mutexes per entity kind. An id maps to a stripe by its value
/// modulo the stripe count.
#[derive(Debug)]
struct Stripes {
    users: Vec<Mutex<()>>,
    promotions: Vec<Mutex<()>>,
    groups: Vec<Mutex<()>>,
}

impl Stripes {
    fn new(count: usize) -> Self {
        let count = count.max(1);
        let make = || (0..count).map(|_| Mutex::new(())).collect::<Vec<_>>();
        Self {
            users: make(),
            promotions: make(),
            groups: make(),
        }
    }

    fn index(&self, raw: i128) -> usize {
        raw.rem_euclid(self.users.len() as i128) as usize
    }

    /// Lock every stripe the scope touches: users, then promotions, then
    /// groups, ascending within each kind. A stripe shared by two ids is
    /// locked once.
    fn lock(&self, scope: &TxScope) -> Vec<MutexGuard<'_, ()>> {
        let users: BTreeSet<usize> = scope
            .user_ids()
            .map(|id| self.index(i128::from(id.get())))
            .collect();
        let promotions: BTreeSet<usize> = scope
            .promotion_ids()
            .map(|id| self.index(i128::from(id.get())))
            .collect();
        let groups: BTreeSet<usize> = scope
            .group_ids()
            .map(|id| self.index(i128::from(id.get())))
            .collect();

        let mut guards = Vec::with_capacity(users.len() + promotions.len() + groups.len());
        for (table, stripes) in [
            (&self.users, users),
            (&self.promotions, promotions),
            (&self.groups, groups),
        ] {
            for i in stripes {
                // A panic inside another transaction never leaves staged
                // data behind, so a poisoned stripe is safe to reuse.
                guards.push(table[i].lock().unwrap_or_else(PoisonError::into_inner));
            }
        }
        guards
    }
}

/// In-memory entity store with striped per-entity locks.
///
/// Committed data lives behind a single `RwLock`, taken briefly to stage a
/// transaction and again to apply its changes. Entity stripes serialize
/// transactions with overlapping scopes.
#[derive(Debug)]
pub struct InMemoryEntityStore {
    tables: RwLock<Tables>,
    flags: RwLock<BTreeMap<String, bool>>,
    stripes: Stripes,
    next_promotion_id: AtomicU64,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_STRIPES)
    }

    /// Create an empty store with `count` lock stripes per entity kind.
    pub fn with_stripes(count: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            flags: RwLock::new(BTreeMap::new()),
            stripes: Stripes::new(count),
            next_promotion_id: AtomicU64::new(PromotionId::FIRST.get()),
        }
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let highest = snapshot
            .promotions
            .iter()
            .map(|p| p.id.next().get())
            .max()
            .unwrap_or(PromotionId::FIRST.get());
        let next = snapshot.next_promotion_id.max(highest);

        let tables = Tables {
            users: snapshot.users.into_iter().map(|u| (u.id, u)).collect(),
            promotions: snapshot.promotions.into_iter().map(|p| (p.id, p)).collect(),
            claims: snapshot.claims.into_iter().map(|c| (c.key(), c)).collect(),
            groups: snapshot.groups.into_iter().map(|g| (g.id, g)).collect(),
        };
        debug!(
            users = tables.users.len(),
            promotions = tables.promotions.len(),
            next_promotion_id = next,
            "store restored from snapshot"
        );

        Self {
            tables: RwLock::new(tables),
            flags: RwLock::new(snapshot.flags),
            stripes: Stripes::new(DEFAULT_STRIPES),
            next_promotion_id: AtomicU64::new(next),
        }
    }

    /// Load the store persisted at `path`, or start empty if the file does
    /// not exist yet.
    pub fn load_snapshot(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        match Snapshot::load(path)? {
            Some(snapshot) => {
                info!(path = %path.display(), "loaded state file");
                Ok(Self::from_snapshot(snapshot))
            }
            None => {
                info!(path = %path.display(), "state file missing, starting empty");
                Ok(Self::new())
            }
        }
    }

    /// Capture committed state. Transactions commit under one write lock, so
    /// the snapshot never contains half of a transaction.
    pub fn snapshot(&self) -> StoreResult<Snapshot> {
        let tables = self.read_tables()?;
        let flags = self
            .flags
            .read()
            .map_err(|_| StoreError::LockPoisoned("flags"))?;
        Ok(Snapshot {
            version: Snapshot::VERSION,
            next_promotion_id: self.next_promotion_id.load(Ordering::SeqCst),
            users: tables.users.values().cloned().collect(),
            promotions: tables.promotions.values().cloned().collect(),
            claims: tables.claims.values().cloned().collect(),
            groups: tables.groups.values().cloned().collect(),
            flags: flags.clone(),
        })
    }

    /// Write a snapshot of committed state to `path`.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        self.snapshot()?.save(path)
    }

    /// Number of users currently stored.
    pub fn user_count(&self) -> StoreResult<usize> {
        Ok(self.read_tables()?.users.len())
    }

    fn read_tables(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::LockPoisoned("tables"))
    }

    fn write_tables(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::LockPoisoned("tables"))
    }
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read_tables()?.users.get(&id).cloned())
    }

    fn promotion(&self, id: PromotionId) -> StoreResult<Option<Promotion>> {
        Ok(self.read_tables()?.promotions.get(&id).cloned())
    }

    fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        Ok(self.read_tables()?.groups.get(&id).cloned())
    }

    fn has_claim(&self, user: UserId, promotion: PromotionId) -> StoreResult<bool> {
        Ok(self.read_tables()?.claims.contains_key(&(user, promotion)))
    }

    fn claim(&self, user: UserId, promotion: PromotionId) -> StoreResult<Option<Claim>> {
        Ok(self.read_tables()?.claims.get(&(user, promotion)).cloned())
    }

    fn users(&self) -> StoreResult<Vec<User>> {
        Ok(self.read_tables()?.users.values().cloned().collect())
    }

    fn user_ids(&self) -> StoreResult<Vec<UserId>> {
        Ok(self.read_tables()?.users.keys().copied().collect())
    }

    fn promotions(&self) -> StoreResult<Vec<Promotion>> {
        Ok(self.read_tables()?.promotions.values().cloned().collect())
    }

    fn funded_promotions(&self) -> StoreResult<Vec<Promotion>> {
        Ok(self
            .read_tables()?
            .promotions
            .values()
            .filter(|p| p.is_funded())
            .cloned()
            .collect())
    }

    fn claims_for(&self, user: UserId) -> StoreResult<Vec<Claim>> {
        let tables = self.read_tables()?;
        Ok(tables
            .claims
            .range((user, PromotionId(0))..=(user, PromotionId(u64::MAX)))
            .map(|(_, claim)| claim.clone())
            .collect())
    }

    fn groups(&self) -> StoreResult<Vec<Group>> {
        Ok(self.read_tables()?.groups.values().cloned().collect())
    }

    fn flag(&self, flag: FeatureFlag) -> StoreResult<bool> {
        let flags = self
            .flags
            .read()
            .map_err(|_| StoreError::LockPoisoned("flags"))?;
        Ok(flags.get(flag.name()).copied().unwrap_or(true))
    }

    fn flags(&self) -> StoreResult<BTreeMap<String, bool>> {
        let flags = self
            .flags
            .read()
            .map_err(|_| StoreError::LockPoisoned("flags"))?;
        Ok(flags.clone())
    }

    fn set_flag(&self, flag: FeatureFlag, enabled: bool) -> StoreResult<()> {
        let mut flags = self
            .flags
            .write()
            .map_err(|_| StoreError::LockPoisoned("flags"))?;
        flags.insert(flag.name().to_string(), enabled);
        debug!(flag = %flag, enabled, "flag set");
        Ok(())
    }

    fn transact<R, E, F>(&self, scope: &TxScope, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut Transaction<'_>) -> Result<R, E>,
    {
        let _guards = self.stripes.lock(scope);

        let mut tx = Transaction::new(&self.next_promotion_id);
        {
            let tables = self.read_tables()?;
            for id in scope.user_ids() {
                tx.stage_user(*id, tables.users.get(id).cloned());
            }
            for id in scope.promotion_ids() {
                tx.stage_promotion(*id, tables.promotions.get(id).cloned());
            }
            for id in scope.group_ids() {
                tx.stage_group(*id, tables.groups.get(id).cloned());
            }
        }

        let out = f(&mut tx)?;

        let changes = tx.into_changes();
        if !changes.is_empty() {
            self.write_tables()?.apply(changes);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;
    use promo_types::{NormalPromo, PromotionPayload};

    use super::*;

    fn seeded(ids: &[i64]) -> InMemoryEntityStore {
        let store = InMemoryEntityStore::new();
        let scope = TxScope::new().users(ids.iter().copied().map(UserId));
        store
            .transact::<_, StoreError, _>(&scope, |tx| {
                for id in ids {
                    let mut user = User::new(UserId(*id), format!("u{id}"), Utc::now());
                    user.credits = 100;
                    tx.insert_user(user)?;
                }
                Ok(())
            })
            .unwrap();
        store
    }

    fn payload() -> PromotionPayload {
        PromotionPayload::Normal(NormalPromo::new("visit", "https://example.org"))
    }

    // ---- Core CRUD ----

    #[test]
    fn committed_writes_are_visible() {
        let store = seeded(&[1, 2]);
        assert_eq!(store.user_count().unwrap(), 2);
        assert_eq!(store.user(UserId(1)).unwrap().unwrap().credits, 100);
        assert!(store.user(UserId(3)).unwrap().is_none());
        assert_eq!(store.user_ids().unwrap(), vec![UserId(1), UserId(2)]);
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = seeded(&[1]);
        let scope = TxScope::new().user(UserId(1));
        let result: Result<(), StoreError> = store.transact(&scope, |tx| {
            let user = tx.user_mut(UserId(1))?.unwrap();
            user.credits = 0;
            tx.insert_promotion(UserId(1), payload(), 5, Utc::now());
            Err(StoreError::Missing {
                entity: "user",
                id: "test".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(store.user(UserId(1)).unwrap().unwrap().credits, 100);
        assert!(store.promotions().unwrap().is_empty());
    }

    #[test]
    fn aborted_transaction_burns_promotion_id() {
        let store = seeded(&[1]);
        let scope = TxScope::new().user(UserId(1));
        let _ = store.transact::<(), StoreError, _>(&scope, |tx| {
            tx.insert_promotion(UserId(1), payload(), 1, Utc::now());
            Err(StoreError::Serialization("abort".into()))
        });
        let id = store
            .transact::<_, StoreError, _>(&scope, |tx| {
                Ok(tx.insert_promotion(UserId(1), payload(), 1, Utc::now()).id)
            })
            .unwrap();
        assert_eq!(id, PromotionId(2));
    }

    #[test]
    fn claims_are_indexed_per_user() {
        let store = seeded(&[1, 2]);
        let scope = TxScope::new().user(UserId(1));
        store
            .transact::<_, StoreError, _>(&scope, |tx| {
                for p in [3, 1, 2] {
                    tx.insert_claim(Claim {
                        user_id: UserId(1),
                        promotion_id: PromotionId(p),
                        reward: 1,
                        claimed_at: Utc::now(),
                    })?;
                }
                Ok(())
            })
            .unwrap();

        let claims = store.claims_for(UserId(1)).unwrap();
        let ids: Vec<_> = claims.iter().map(|c| c.promotion_id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(store.has_claim(UserId(1), PromotionId(2)).unwrap());
        assert!(!store.has_claim(UserId(2), PromotionId(2)).unwrap());
        assert!(store.claims_for(UserId(2)).unwrap().is_empty());
    }

    #[test]
    fn out_of_scope_access_aborts() {
        let store = seeded(&[1, 2]);
        let scope = TxScope::new().user(UserId(1));
        let err = store
            .transact::<(), StoreError, _>(&scope, |tx| {
                tx.user_mut(UserId(2))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfScope { .. }));
    }

    // ---- Flags ----

    #[test]
    fn flags_default_to_enabled() {
        let store = InMemoryEntityStore::new();
        assert!(store.flag(FeatureFlag::GroupPromo).unwrap());
        store.set_flag(FeatureFlag::GroupPromo, false).unwrap();
        assert!(!store.flag(FeatureFlag::GroupPromo).unwrap());
        assert!(store.flag(FeatureFlag::ImagePromo).unwrap());
        assert_eq!(store.flags().unwrap().len(), 1);
    }

    // ---- Concurrency ----

    #[test]
    fn overlapping_transfers_conserve_credits() {
        let ids: Vec<i64> = (1..=6).collect();
        let store = Arc::new(InMemoryEntityStore::with_stripes(4));
        {
            let seeded = seeded(&ids);
            let scope = TxScope::new().users(ids.iter().copied().map(UserId));
            store
                .transact::<_, StoreError, _>(&scope, |tx| {
                    for user in seeded.users()? {
                        tx.insert_user(user)?;
                    }
                    Ok(())
                })
                .unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200 {
                        let from = UserId(((t + i) % 6 + 1) as i64);
                        let to = UserId(((t * 7 + i * 3) % 6 + 1) as i64);
                        if from == to {
                            continue;
                        }
                        let scope = TxScope::new().user(to).user(from);
                        store
                            .transact::<_, StoreError, _>(&scope, |tx| {
                                let balance = tx.user(from)?.map_or(0, |u| u.credits);
                                if balance == 0 {
                                    return Ok(());
                                }
                                if let Some(u) = tx.user_mut(from)? {
                                    u.credits -= 1;
                                }
                                if let Some(u) = tx.user_mut(to)? {
                                    u.credits += 1;
                                }
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let total: i64 = store.users().unwrap().iter().map(|u| u.credits).sum();
        assert_eq!(total, 600);
        assert!(store.users().unwrap().iter().all(|u| u.credits >= 0));
    }

    // ---- Snapshots ----

    #[test]
    fn snapshot_round_trip_keeps_id_counter() {
        let store = seeded(&[1]);
        store.set_flag(FeatureFlag::ImagePromo, false).unwrap();
        store
            .transact::<_, StoreError, _>(&TxScope::new().user(UserId(1)), |tx| {
                tx.insert_promotion(UserId(1), payload(), 4, Utc::now());
                Ok(())
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        store.save_snapshot(&path).unwrap();

        let restored = InMemoryEntityStore::load_snapshot(&path).unwrap();
        assert_eq!(restored.promotions().unwrap().len(), 1);
        assert!(!restored.flag(FeatureFlag::ImagePromo).unwrap());
        let next = restored
            .transact::<_, StoreError, _>(&TxScope::new(), |tx| {
                Ok(tx.insert_promotion(UserId(1), payload(), 1, Utc::now()).id)
            })
            .unwrap();
        assert_eq!(next, PromotionId(2));
    }

    #[test]
    fn open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryEntityStore::load_snapshot(dir.path().join("absent.json")).unwrap();
        assert_eq!(store.user_count().unwrap(), 0);
    }
}
