use promo_store::{EntityStore, TxScope};
use promo_types::{User, UserId};
use tracing::debug;

use crate::engine::{staged_user_mut, CreditEngine};
use crate::error::{EngineError, EngineResult};

/// Remove `amount` from a staged balance, refusing to go negative.
pub(crate) fn withdraw(user: &mut User, amount: i64) -> EngineResult<i64> {
    if user.credits < amount {
        return Err(EngineError::InsufficientCredits {
            needed: amount,
            available: user.credits,
        });
    }
    user.credits -= amount;
    Ok(user.credits)
}

/// Add `amount` to a staged balance, refusing a total past `i64::MAX`.
pub(crate) fn deposit(user: &mut User, amount: i64) -> EngineResult<i64> {
    user.credits = user.credits.checked_add(amount).ok_or_else(|| {
        EngineError::InvalidInput(format!(
            "crediting {amount} would overflow the balance of {}",
            user.id
        ))
    })?;
    Ok(user.credits)
}

fn positive(amount: i64) -> EngineResult<i64> {
    if amount <= 0 {
        return Err(EngineError::InvalidInput(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(amount)
}

impl<S: EntityStore> CreditEngine<S> {
    /// Add `amount` credits. Returns the new balance.
    pub fn credit(&self, user: UserId, amount: i64) -> EngineResult<i64> {
        let amount = positive(amount)?;
        let balance = self.store.transact(&TxScope::new().user(user), |tx| {
            deposit(staged_user_mut(tx, user)?, amount)
        })?;
        debug!(user = %user, amount, balance, "credited");
        Ok(balance)
    }

    /// Remove `amount` credits if the balance covers it. Returns the new
    /// balance; on `InsufficientCredits` the balance is unchanged.
    pub fn debit(&self, user: UserId, amount: i64) -> EngineResult<i64> {
        let amount = positive(amount)?;
        let balance = self.store.transact(&TxScope::new().user(user), |tx| {
            withdraw(staged_user_mut(tx, user)?, amount)
        })?;
        debug!(user = %user, amount, balance, "debited");
        Ok(balance)
    }
}
