use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use common::utils::{TxStatus, TxType, UserStatus};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::EngineError;

/// One ledger entry. Amounts are signed FCFA: debits are negative,
/// credits positive, `BET_LOST_NOOP` exactly zero. Entries are never
/// removed; the only permitted mutation is the pending -> completed/failed
/// status transition.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: i64,
    pub tx_type: TxType,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub status: TxStatus,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Contribution to the spendable balance under the current status.
    /// Pending debits hold funds immediately; pending credits and failed
    /// entries count for nothing.
    pub fn effective_amount(&self) -> i64 {
        match self.status {
            TxStatus::COMPLETED => self.amount,
            TxStatus::PENDING if self.tx_type.is_debit() => self.amount,
            _ => 0,
        }
    }
}

fn validate_polarity(tx_type: TxType, amount: i64) -> Result<(), EngineError> {
    if tx_type.is_zero_amount() {
        if amount != 0 {
            return Err(EngineError::validation(format!(
                "{} requires a zero amount, got {}",
                tx_type.to_string(),
                amount
            )));
        }
    } else if tx_type.is_debit() {
        if amount >= 0 {
            return Err(EngineError::validation(format!(
                "{} requires a negative amount, got {}",
                tx_type.to_string(),
                amount
            )));
        }
    } else if amount <= 0 {
        return Err(EngineError::validation(format!(
            "{} requires a positive amount, got {}",
            tx_type.to_string(),
            amount
        )));
    }
    Ok(())
}

/// All per-user state, guarded by one async lock in the engine so that
/// appends for a single user are strictly serialized.
#[derive(Debug)]
pub struct Account {
    pub user_id: i64,
    pub country: String,
    pub status: UserStatus,
    pub referral_code: String,
    pub created_at: DateTime<Utc>,
    balance: i64,
    entries: Vec<Transaction>,
    by_reference: HashMap<String, usize>,
    // daily reward state
    pub last_claim_date: Option<NaiveDate>,
    pub streak_count: u32,
    pub milestones_paid: HashSet<u32>,
    // referral state, fixed at registration
    pub ancestors: [Option<i64>; 3],
    pub referred_ids: Vec<i64>,
    pub first_deposit_commission_paid: bool,
    pub paid_commission_periods: HashSet<String>,
    // non-refunded bets per calendar day
    pub daily_bets: HashMap<NaiveDate, u32>,
}

impl Account {
    pub fn new(
        user_id: i64,
        country: &str,
        referral_code: &str,
        ancestors: [Option<i64>; 3],
        created_at: DateTime<Utc>,
    ) -> Self {
        Account {
            user_id,
            country: country.to_string(),
            status: UserStatus::ACTIVE,
            referral_code: referral_code.to_string(),
            created_at,
            balance: 0,
            entries: Vec::new(),
            by_reference: HashMap::new(),
            last_claim_date: None,
            streak_count: 0,
            milestones_paid: HashSet::new(),
            ancestors,
            referred_ids: Vec::new(),
            first_deposit_commission_paid: false,
            paid_commission_periods: HashSet::new(),
            daily_bets: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::ACTIVE
    }

    /// The eagerly maintained spendable balance.
    pub fn balance(&self) -> i64 {
        self.balance
    }

    /// The same balance derived by folding the log. Must always agree
    /// with the eager counter.
    pub fn folded_balance(&self) -> i64 {
        self.entries.iter().map(Transaction::effective_amount).sum()
    }

    pub fn entries(&self) -> &[Transaction] {
        &self.entries
    }

    pub fn find_by_reference(&self, reference: &str) -> Option<&Transaction> {
        self.by_reference
            .get(reference)
            .map(|idx| &self.entries[*idx])
    }

    /// Appends one entry. Fails `DuplicateReference` when the reference was
    /// already applied, `InsufficientFunds` when a debit would overdraw the
    /// spendable balance. Balance snapshots and the eager counter move in
    /// the same call, so there is no intermediate state to observe.
    pub fn append(
        &mut self,
        tx_type: TxType,
        amount: i64,
        status: TxStatus,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, EngineError> {
        if reference.trim().is_empty() {
            return Err(EngineError::validation("empty idempotency reference"));
        }
        if status == TxStatus::FAILED {
            return Err(EngineError::validation(
                "entries are appended as pending or completed",
            ));
        }
        if self.by_reference.contains_key(reference) {
            return Err(EngineError::DuplicateReference {
                reference: reference.to_string(),
            });
        }
        validate_polarity(tx_type, amount)?;

        if tx_type.is_debit() && self.balance + amount < 0 {
            return Err(EngineError::InsufficientFunds {
                balance: self.balance,
                requested: -amount,
            });
        }

        let effect = match status {
            TxStatus::COMPLETED => amount,
            // a pending debit holds the funds; a pending credit is worthless
            // until the gateway confirms it
            TxStatus::PENDING if tx_type.is_debit() => amount,
            _ => 0,
        };
        let next_balance = self
            .balance
            .checked_add(effect)
            .ok_or_else(|| EngineError::validation("balance limit exceeded"))?;

        let tx = Transaction {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id,
            tx_type,
            amount,
            balance_before: self.balance,
            balance_after: next_balance,
            status,
            reference: reference.to_string(),
            created_at: now,
        };

        self.balance = next_balance;
        self.by_reference
            .insert(reference.to_string(), self.entries.len());
        self.entries.push(tx.clone());
        Ok(tx)
    }

    /// `append`, except an already-applied reference replays the prior
    /// entry instead of failing. The flag is true when the entry is fresh.
    pub fn append_or_replay(
        &mut self,
        tx_type: TxType,
        amount: i64,
        status: TxStatus,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, bool), EngineError> {
        if let Some(prior) = self.find_by_reference(reference) {
            return Ok((prior.clone(), false));
        }
        let tx = self.append(tx_type, amount, status, reference, now)?;
        Ok((tx, true))
    }

    /// Transitions a pending entry to completed or failed, adjusting the
    /// eager counter by the difference in effective amount. Replaying a
    /// transition on an already-terminal entry changes nothing and returns
    /// the current state with `false`.
    pub fn resolve(
        &mut self,
        reference: &str,
        success: bool,
    ) -> Result<(Transaction, bool), EngineError> {
        let idx = *self.by_reference.get(reference).ok_or_else(|| {
            EngineError::validation(format!("unknown reference: {}", reference))
        })?;
        if self.entries[idx].status != TxStatus::PENDING {
            return Ok((self.entries[idx].clone(), false));
        }

        // a confirmed entry lands its full amount, a failed one lands
        // nothing; check the counter move before committing the status
        let before = self.entries[idx].effective_amount();
        let after = if success { self.entries[idx].amount } else { 0 };
        let next_balance = self
            .balance
            .checked_add(after - before)
            .ok_or_else(|| EngineError::validation("balance limit exceeded"))?;
        self.entries[idx].status = if success {
            TxStatus::COMPLETED
        } else {
            TxStatus::FAILED
        };
        self.balance = next_balance;

        Ok((self.entries[idx].clone(), true))
    }

    /// Completed wager volume appended strictly after `cutoff`.
    pub fn wager_volume_since(&self, cutoff: DateTime<Utc>) -> i64 {
        self.entries
            .iter()
            .filter(|tx| {
                tx.tx_type == TxType::BET_PLACED
                    && tx.status == TxStatus::COMPLETED
                    && tx.created_at > cutoff
            })
            .map(|tx| -tx.amount)
            .sum()
    }

    /// Hydration path: pushes a persisted entry back without re-validating,
    /// rebuilding the reference index and the eager counter.
    pub fn restore_entry(&mut self, tx: Transaction) {
        self.balance += tx.effective_amount();
        self.by_reference
            .insert(tx.reference.clone(), self.entries.len());
        self.entries.push(tx);
    }
}
