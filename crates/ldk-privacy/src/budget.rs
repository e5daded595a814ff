//! Token budget manager.
//!
//! Daily and monthly usage counters are persisted through the store so a
//! restart cannot reset a spent budget. Exhaustion is a *policy* outcome:
//! the proxy short-circuits with `BudgetExhausted` and the router degrades
//! to L1-only mode until the period rolls over.

use chrono::Utc;

use ldk_store::Store;

use crate::proxy::EgressError;

/// Budget caps plus the persistent counters behind them.
#[derive(Clone)]
pub struct TokenBudget {
    store: Store,
    daily_cap: i64,
    monthly_cap: i64,
}

impl TokenBudget {
    pub fn new(store: Store, daily_cap: u64, monthly_cap: u64) -> Self {
        Self {
            store,
            daily_cap: daily_cap as i64,
            monthly_cap: monthly_cap as i64,
        }
    }

    /// Fail when either period is already at or over its cap.
    pub async fn check(&self) -> Result<(), EgressError> {
        let (daily, monthly) = self
            .store
            .token_usage(Utc::now())
            .await
            .map_err(|e| EgressError::Transport(format!("budget lookup: {e}")))?;
        if daily >= self.daily_cap {
            return Err(EgressError::BudgetExhausted {
                period: "daily",
                used: daily,
                cap: self.daily_cap,
            });
        }
        if monthly >= self.monthly_cap {
            return Err(EgressError::BudgetExhausted {
                period: "monthly",
                used: monthly,
                cap: self.monthly_cap,
            });
        }
        Ok(())
    }

    /// Record tokens consumed by a completed call.
    pub async fn record(&self, tokens: u64) -> Result<(), EgressError> {
        self.store
            .record_token_usage(Utc::now(), tokens as i64)
            .await
            .map_err(|e| EgressError::Transport(format!("budget record: {e}")))
    }

    /// Current `(daily_used, daily_cap, monthly_used, monthly_cap)`.
    pub async fn usage(&self) -> Result<(i64, i64, i64, i64), EgressError> {
        let (daily, monthly) = self
            .store
            .token_usage(Utc::now())
            .await
            .map_err(|e| EgressError::Transport(format!("budget lookup: {e}")))?;
        Ok((daily, self.daily_cap, monthly, self.monthly_cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldk_store::StoreOptions;

    #[tokio::test]
    async fn budget_trips_at_daily_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
        let budget = TokenBudget::new(store, 100, 10_000);

        budget.check().await.unwrap();
        budget.record(60).await.unwrap();
        budget.check().await.unwrap();
        budget.record(40).await.unwrap();

        let err = budget.check().await.unwrap_err();
        match err {
            EgressError::BudgetExhausted { period, used, cap } => {
                assert_eq!(period, "daily");
                assert_eq!(used, 100);
                assert_eq!(cap, 100);
            }
            other => panic!("expected BudgetExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn monthly_cap_independent_of_daily() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(StoreOptions::at_dir(dir.path())).await.unwrap();
        let budget = TokenBudget::new(store, 1_000, 50);

        budget.record(50).await.unwrap();
        let err = budget.check().await.unwrap_err();
        assert!(matches!(
            err,
            EgressError::BudgetExhausted {
                period: "monthly",
                ..
            }
        ));
    }
}
