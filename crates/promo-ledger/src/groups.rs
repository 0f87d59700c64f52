use chrono::Utc;
use promo_store::{EntityStore, TxScope};
use promo_types::{Group, GroupId, UserId};
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, info};

use crate::engine::CreditEngine;
use crate::error::{EngineError, EngineResult};
use crate::ledger::deposit;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupRegistration {
    pub group: Group,
    pub created: bool,
    /// Credits paid to the user who added the bot, if any.
    pub reward: Option<(UserId, i64)>,
}

impl<S: EntityStore> CreditEngine<S> {
    /// Record that the bot was added to `group`.
    ///
    /// A new group is active only when the bot is admin there; in that case
    /// the adder, if known, earns the group-add reward in the same step. A
    /// known group just has its title and status refreshed.
    pub fn register_group(
        &self,
        group: GroupId,
        title: &str,
        added_by: Option<UserId>,
        bot_is_admin: bool,
    ) -> EngineResult<GroupRegistration> {
        let mut scope = TxScope::new().group(group);
        if let Some(adder) = added_by {
            scope = scope.user(adder);
        }

        let registration = self.store.transact(&scope, |tx| {
            if let Some(existing) = tx.group_mut(group)? {
                existing.title = title.to_string();
                existing.active = bot_is_admin;
                return Ok::<_, EngineError>(GroupRegistration {
                    group: existing.clone(),
                    created: false,
                    reward: None,
                });
            }

            let now = Utc::now();
            let record = Group::new(group, title, added_by, bot_is_admin, now);
            tx.insert_group(record.clone())?;

            let mut reward = None;
            if bot_is_admin {
                if let Some(adder) = added_by {
                    if let Some(user) = tx.user_mut(adder)? {
                        let amount = self
                            .config
                            .rewards
                            .group_add_reward_for(user.premium_active(now));
                        deposit(user, amount)?;
                        reward = Some((adder, amount));
                    }
                }
            }
            Ok(GroupRegistration {
                group: record,
                created: true,
                reward,
            })
        })?;

        info!(
            group = %group,
            created = registration.created,
            active = registration.group.active,
            reward = ?registration.reward,
            "group registered"
        );
        Ok(registration)
    }

    /// Stop delivering to `group`. Returns whether it was active.
    pub fn mark_group_inactive(&self, group: GroupId) -> EngineResult<bool> {
        let was_active = self.store.transact(&TxScope::new().group(group), |tx| {
            Ok::<_, EngineError>(match tx.group_mut(group)? {
                Some(g) if g.active => {
                    g.active = false;
                    true
                }
                _ => false,
            })
        })?;
        if was_active {
            debug!(group = %group, "group marked inactive");
        }
        Ok(was_active)
    }

    pub fn active_group_ids(&self) -> EngineResult<Vec<GroupId>> {
        Ok(self
            .store
            .groups()?
            .into_iter()
            .filter(|g| g.active)
            .map(|g| g.id)
            .collect())
    }

    /// Up to `count` random non-banned users other than `exclude`.
    pub fn broadcast_recipients(&self, exclude: UserId, count: usize) -> EngineResult<Vec<UserId>> {
        let pool: Vec<UserId> = self
            .store
            .users()?
            .into_iter()
            .filter(|u| u.id != exclude && !u.is_banned)
            .map(|u| u.id)
            .collect();
        Ok(pool
            .choose_multiple(&mut rand::thread_rng(), count)
            .copied()
            .collect())
    }
}
