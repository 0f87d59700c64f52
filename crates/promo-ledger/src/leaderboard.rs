use promo_store::EntityStore;
use promo_types::UserId;
use serde::Serialize;

use crate::engine::CreditEngine;
use crate::error::EngineResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based.
    pub rank: usize,
    pub user_id: UserId,
    pub username: String,
    pub clicks_received: u64,
}

impl<S: EntityStore> CreditEngine<S> {
    /// The `n` users whose promotions were completed most this week. Ties
    /// go to the lower user id.
    pub fn top_n(&self, n: usize) -> EngineResult<Vec<LeaderboardEntry>> {
        let mut users = self.store.users()?;
        users.sort_by(|a, b| {
            b.clicks_received
                .cmp(&a.clicks_received)
                .then(a.id.cmp(&b.id))
        });
        Ok(users
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(i, u)| LeaderboardEntry {
                rank: i + 1,
                user_id: u.id,
                username: u.username,
                clicks_received: u.clicks_received,
            })
            .collect())
    }
}
