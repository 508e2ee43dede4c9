//! Per-tenant budget ledger
//!
//! Balances are kept in integer micro-dollars. The current period and its
//! spend live behind one lock per account, so a debit can never overdraw
//! the account or land in a period that is being reset. Accounts roll over
//! to a fresh period lazily.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::BudgetConfig;
use crate::error::{CairnError, Result};

const MICROS_PER_USD: f64 = 1_000_000.0;

fn to_micros(usd: f64) -> Result<u64> {
    if !usd.is_finite() || usd < 0.0 {
        return Err(CairnError::Validation(format!(
            "budget amounts must be finite and non-negative, got {usd}"
        )));
    }
    Ok((usd * MICROS_PER_USD).round() as u64)
}

fn to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub tenant_id: String,
    pub period: i64,
    pub limit: f64,
    pub spent: f64,
    pub remaining: f64,
    /// Spend passed the warning ratio this period
    pub warning: bool,
}

impl BudgetStatus {
    pub fn remaining_ratio(&self) -> f64 {
        if self.limit <= 0.0 {
            0.0
        } else {
            (self.remaining / self.limit).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug)]
struct Period {
    index: i64,
    spent: u64,
    warned: bool,
}

#[derive(Debug)]
struct Account {
    limit: AtomicU64,
    period: Mutex<Period>,
}

impl Account {
    fn lock(&self) -> MutexGuard<'_, Period> {
        self.period.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct BudgetLedger {
    config: BudgetConfig,
    accounts: DashMap<String, Arc<Account>>,
}

impl BudgetLedger {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            accounts: DashMap::new(),
        }
    }

    fn period_index(&self, now: DateTime<Utc>) -> i64 {
        let days = i64::from(self.config.period_days.max(1));
        now.timestamp().div_euclid(days * 86_400)
    }

    fn account(&self, tenant_id: &str, now: DateTime<Utc>) -> Arc<Account> {
        self.accounts
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(Account {
                    limit: AtomicU64::new(to_micros(self.config.period_limit_usd).unwrap_or(0)),
                    period: Mutex::new(Period {
                        index: self.period_index(now),
                        spent: 0,
                        warned: false,
                    }),
                })
            })
            .clone()
    }

    /// Lock the account's period, starting a new one first if `now` is
    /// past it.
    fn current<'a>(
        &self,
        tenant_id: &str,
        account: &'a Account,
        now: DateTime<Utc>,
    ) -> MutexGuard<'a, Period> {
        let mut period = account.lock();
        self.roll(tenant_id, &mut period, now);
        period
    }

    /// Returns true if this call performed the rollover
    fn roll(&self, tenant_id: &str, period: &mut Period, now: DateTime<Utc>) -> bool {
        let target = self.period_index(now);
        if target <= period.index {
            return false;
        }
        *period = Period {
            index: target,
            spent: 0,
            warned: false,
        };
        tracing::info!(tenant_id, period = target, "Budget period rolled over");
        true
    }

    /// Explicitly roll a tenant's account forward to the period containing `now`
    pub fn rollover(&self, tenant_id: &str, now: DateTime<Utc>) -> bool {
        let account = self.accounts.get(tenant_id).map(|a| a.clone());
        match account {
            Some(account) => self.roll(tenant_id, &mut account.lock(), now),
            None => false,
        }
    }

    /// Override a tenant's per-period limit
    pub fn set_limit(&self, tenant_id: &str, limit_usd: f64) -> Result<()> {
        let micros = to_micros(limit_usd)?;
        self.account(tenant_id, Utc::now())
            .limit
            .store(micros, Ordering::Release);
        Ok(())
    }

    /// Spend `amount_usd` if the balance covers it
    pub fn debit(&self, tenant_id: &str, amount_usd: f64) -> Result<()> {
        self.debit_at(tenant_id, amount_usd, Utc::now())
    }

    fn debit_at(&self, tenant_id: &str, amount_usd: f64, now: DateTime<Utc>) -> Result<()> {
        let amount = to_micros(amount_usd)?;
        let account = self.account(tenant_id, now);
        let limit = account.limit.load(Ordering::Acquire);
        let mut period = self.current(tenant_id, &account, now);

        match period.spent.checked_add(amount).filter(|total| *total <= limit) {
            Some(total) => {
                period.spent = total;
                self.maybe_warn(tenant_id, &mut period, limit);
                Ok(())
            }
            None => Err(CairnError::BudgetExceeded {
                tenant_id: tenant_id.to_string(),
                requested: amount_usd,
                remaining: to_usd(limit.saturating_sub(period.spent)),
            }),
        }
    }

    /// Return unspent funds, e.g. after a downgraded operation
    pub fn credit(&self, tenant_id: &str, amount_usd: f64) -> Result<()> {
        let amount = to_micros(amount_usd)?;
        let now = Utc::now();
        let account = self.account(tenant_id, now);
        let mut period = self.current(tenant_id, &account, now);
        period.spent = period.spent.saturating_sub(amount);
        Ok(())
    }

    /// Settle a pessimistic estimate against the actual cost. Overruns are
    /// taken from what is left, never past the limit.
    pub fn reconcile(&self, tenant_id: &str, estimated_usd: f64, actual_usd: f64) -> Result<()> {
        let estimated = to_micros(estimated_usd)?;
        let actual = to_micros(actual_usd)?;

        if actual <= estimated {
            return self.credit(tenant_id, to_usd(estimated - actual));
        }

        let extra = actual - estimated;
        let now = Utc::now();
        let account = self.account(tenant_id, now);
        let limit = account.limit.load(Ordering::Acquire);
        let mut period = self.current(tenant_id, &account, now);
        let total = period.spent.saturating_add(extra).min(limit.max(period.spent));
        let charged = total - period.spent;
        period.spent = total;
        if charged < extra {
            tracing::warn!(
                tenant_id,
                shortfall = to_usd(extra - charged),
                "Actual cost exceeded remaining budget"
            );
        }
        self.maybe_warn(tenant_id, &mut period, limit);
        Ok(())
    }

    fn maybe_warn(&self, tenant_id: &str, period: &mut Period, limit: u64) {
        if limit == 0 || period.warned {
            return;
        }
        let ratio = period.spent as f64 / limit as f64;
        if ratio >= self.config.warning_ratio {
            period.warned = true;
            tracing::warn!(
                tenant_id,
                spent = to_usd(period.spent),
                limit = to_usd(limit),
                "Budget warning threshold reached"
            );
        }
    }

    pub fn remaining(&self, tenant_id: &str) -> f64 {
        self.status(tenant_id).remaining
    }

    pub fn status(&self, tenant_id: &str) -> BudgetStatus {
        let now = Utc::now();
        let account = self.account(tenant_id, now);
        let limit = account.limit.load(Ordering::Acquire);
        let period = self.current(tenant_id, &account, now);
        BudgetStatus {
            tenant_id: tenant_id.to_string(),
            period: period.index,
            limit: to_usd(limit),
            spent: to_usd(period.spent),
            remaining: to_usd(limit.saturating_sub(period.spent)),
            warning: period.warned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ledger(limit: f64) -> BudgetLedger {
        BudgetLedger::new(BudgetConfig {
            period_limit_usd: limit,
            ..Default::default()
        })
    }

    #[test]
    fn test_debit_until_exhausted() {
        let l = ledger(0.05);
        assert!(l.debit("t1", 0.02).is_ok());
        assert!(l.debit("t1", 0.02).is_ok());
        let err = l.debit("t1", 0.02).unwrap_err();
        assert!(matches!(err, CairnError::BudgetExceeded { .. }));
        assert!((l.remaining("t1") - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_accounts_are_per_tenant() {
        let l = ledger(0.02);
        l.debit("t1", 0.02).unwrap();
        assert!(l.debit("t2", 0.02).is_ok());
        assert_eq!(l.remaining("t1"), 0.0);
    }

    #[test]
    fn test_rejects_negative_amounts() {
        let l = ledger(1.0);
        assert!(matches!(l.debit("t1", -1.0), Err(CairnError::Validation(_))));
        assert!(l.debit("t1", f64::NAN).is_err());
    }

    #[test]
    fn test_reconcile_refunds_and_caps() {
        let l = ledger(1.0);
        l.debit("t1", 0.5).unwrap();
        l.reconcile("t1", 0.5, 0.2).unwrap();
        assert!((l.status("t1").spent - 0.2).abs() < 1e-9);

        l.debit("t1", 0.5).unwrap();
        l.reconcile("t1", 0.5, 5.0).unwrap();
        let status = l.status("t1");
        assert!((status.spent - 1.0).abs() < 1e-9);
        assert_eq!(status.remaining, 0.0);
    }

    #[test]
    fn test_warning_set_once() {
        let l = ledger(1.0);
        l.debit("t1", 0.5).unwrap();
        assert!(!l.status("t1").warning);
        l.debit("t1", 0.35).unwrap();
        assert!(l.status("t1").warning);
    }

    #[test]
    fn test_rollover_resets_spend() {
        let l = ledger(1.0);
        l.debit("t1", 1.0).unwrap();
        assert!(l.debit("t1", 0.01).is_err());

        let next_period = Utc::now() + Duration::days(31);
        assert!(l.rollover("t1", next_period));
        assert!(!l.rollover("t1", next_period));
        let status = l.status("t1");
        assert_eq!(status.spent, 0.0);
        assert!(!status.warning);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let l = Arc::new(ledger(1.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = l.clone();
                std::thread::spawn(move || (0..50).filter(|_| l.debit("t1", 0.01).is_ok()).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(granted, 100);
        assert_eq!(l.remaining("t1"), 0.0);
    }

    #[test]
    fn test_debits_racing_a_rollover_are_all_counted() {
        let l = Arc::new(ledger(1.0));
        l.debit("t1", 1.0).unwrap();

        let next_period = Utc::now() + Duration::days(31);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = l.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| l.debit_at("t1", 0.01, next_period).is_ok())
                        .count()
                })
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Exactly one fresh period's worth of spend, nothing reset away
        assert_eq!(granted, 100);
        let status = l.status("t1");
        assert_eq!(status.period, l.period_index(next_period));
        assert!((status.spent - 1.0).abs() < 1e-9);
        assert!(!l.rollover("t1", next_period));
    }
}
