use promo_store::EntityStore;
use promo_types::{Promotion, UserId};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::engine::CreditEngine;
use crate::error::{EngineError, EngineResult};

impl<S: EntityStore> CreditEngine<S> {
    /// Funded promotions `user` may still complete: not their own and not
    /// already claimed. Ordered by id.
    pub fn eligible_tasks(&self, user: UserId) -> EngineResult<Vec<Promotion>> {
        let u = self.user(user)?;
        if u.is_banned {
            return Err(EngineError::Banned(user));
        }
        Ok(self
            .store
            .funded_promotions()?
            .into_iter()
            .filter(|p| p.owner_id != user && !u.has_completed(p.id))
            .collect())
    }

    /// A uniformly random eligible promotion, or `None` when there is
    /// nothing to do right now.
    pub fn pick_task(&self, user: UserId) -> EngineResult<Option<Promotion>> {
        self.pick_task_with(user, &mut rand::thread_rng())
    }

    pub fn pick_task_with<R: Rng + ?Sized>(
        &self,
        user: UserId,
        rng: &mut R,
    ) -> EngineResult<Option<Promotion>> {
        let candidates = self.eligible_tasks(user)?;
        Ok(candidates.choose(rng).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use promo_types::{NormalPromo, PromotionPayload};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::engine::testing::*;

    use super::*;

    fn payload() -> PromotionPayload {
        PromotionPayload::Normal(NormalPromo::new("go", "https://example.org"))
    }

    #[test]
    fn filters_own_claimed_and_exhausted() {
        let engine = engine();
        let me = user_with(&engine, 1, 10);
        let other = user_with(&engine, 2, 10);
        let third = user_with(&engine, 3, 0);

        let mine = engine.create_promotion(me, payload(), 1).unwrap().id;
        let done = engine.create_promotion(other, payload(), 5).unwrap().id;
        let drained = engine.create_promotion(other, payload(), 1).unwrap().id;
        let open = engine.create_promotion(other, payload(), 2).unwrap().id;

        engine.try_claim(me, done).unwrap();
        engine.try_claim(third, drained).unwrap();

        let ids: Vec<_> = engine
            .eligible_tasks(me)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![open]);
        assert!(!ids.contains(&mine));
        assert_eq!(engine.pick_task(me).unwrap().map(|p| p.id), Some(open));
    }

    #[test]
    fn empty_pool_is_none_not_error() {
        let engine = engine();
        let me = user_with(&engine, 1, 10);
        assert!(engine.pick_task(me).unwrap().is_none());
    }

    #[test]
    fn banned_and_unknown_users_fail() {
        let engine = engine();
        let me = user_with(&engine, 1, 10);
        edit_user(&engine, me, |u| u.is_banned = true);
        assert!(matches!(engine.pick_task(me), Err(EngineError::Banned(_))));
        assert!(matches!(
            engine.pick_task(UserId(5)),
            Err(EngineError::UserNotFound(_))
        ));
    }

    #[test]
    fn selection_reaches_every_candidate() {
        let engine = engine();
        let owner = user_with(&engine, 1, 50);
        let me = user_with(&engine, 2, 0);
        let all: BTreeSet<_> = (0..4)
            .map(|_| engine.create_promotion(owner, payload(), 1).unwrap().id)
            .collect();

        let mut rng = StdRng::seed_from_u64(7);
        let seen: BTreeSet<_> = (0..200)
            .filter_map(|_| engine.pick_task_with(me, &mut rng).unwrap())
            .map(|p| p.id)
            .collect();
        assert_eq!(seen, all);
    }
}
