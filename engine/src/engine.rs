use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use common::models as rows;
use common::utils::{
    BetSlot, BetStatus, MatchOutcome, PredictionStatus, TxStatus, TxType, UserStatus,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::constants::{
    bps_of, win_payout, FIRST_DEPOSIT_COMMISSION_BPS, LOCK_WAIT_MS, REFERRAL_CODE_LEN,
    WAGER_WINDOW_DAYS, WEEKLY_COMMISSION_BPS,
};
use crate::errors::EngineError;
use crate::ledger::{Account, Transaction};
use crate::predictions::{stake_for, Bet, NewPrediction, Prediction};
use crate::referrals::{self, ReferralStats};
use crate::rewards::{self, ClaimOutcome};
use crate::vip::{VipLevel, VipTable};

#[derive(Debug)]
struct PredictionEntry {
    prediction: Prediction,
    bets: Vec<Bet>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredUser {
    pub user_id: i64,
    pub referral_code: String,
    pub referrer_id: Option<i64>,
    pub ancestors: [Option<i64>; 3],
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionPayment {
    pub ancestor_id: i64,
    pub descendant_id: i64,
    pub level: u8,
    pub amount: i64,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmOutcome {
    pub transaction: Transaction,
    pub changed: bool,
    pub commissions: Vec<CommissionPayment>,
    pub commissions_skipped: u32,
}

/// How a single ancestor credit landed.
enum CommissionCredit {
    Paid(CommissionPayment),
    AlreadyPaid,
    SkippedInactive,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedBet {
    pub bet: Bet,
    pub stake: Transaction,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettledBet {
    pub bet: Bet,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementSummary {
    pub prediction: Prediction,
    pub won: u32,
    pub lost: u32,
    pub refunded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub bets: Vec<SettledBet>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SweepSummary {
    pub closed: Vec<Prediction>,
    pub settlements: Vec<SettlementSummary>,
    pub failed: u32,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionRun {
    pub period: String,
    pub last_processed_user: Option<i64>,
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub finished: bool,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionRunSummary {
    pub period: String,
    pub processed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub finished: bool,
    pub cancelled: bool,
    pub payments: Vec<CommissionPayment>,
    pub run: CommissionRun,
}

/// Client-supplied idempotency keys are namespaced so they can never
/// collide with internally minted references.
fn gateway_reference(prefix: &str, request_ref: Option<String>) -> Result<String, EngineError> {
    match request_ref {
        Some(client_ref) => {
            let client_ref = client_ref.trim().to_string();
            if client_ref.is_empty() {
                return Err(EngineError::validation("reference must not be blank"));
            }
            Ok(format!("{}:{}", prefix, client_ref))
        }
        None => Ok(format!("{}:{}", prefix, Uuid::new_v4())),
    }
}

/// The wallet core. All monetary state lives here behind per-user locks;
/// callers across different users run fully in parallel, appends for one
/// user are strictly serialized. The service layer persists accepted
/// mutations and rebuilds this state through `hydrate` at startup.
pub struct Engine {
    accounts: RwLock<HashMap<i64, Arc<Mutex<Account>>>>,
    codes: RwLock<HashMap<String, i64>>,
    gateway_refs: RwLock<HashMap<String, i64>>,
    predictions: RwLock<HashMap<i64, Arc<Mutex<PredictionEntry>>>>,
    commission_runs: Mutex<HashMap<String, CommissionRun>>,
    vip_table: VipTable,
    next_user_id: AtomicI64,
    next_prediction_id: AtomicI64,
    next_bet_id: AtomicI64,
    daily_bet_limit: u32,
    lock_wait: Duration,
}

impl Engine {
    pub fn new(vip_table: VipTable, daily_bet_limit: u32) -> Self {
        Engine {
            accounts: RwLock::new(HashMap::new()),
            codes: RwLock::new(HashMap::new()),
            gateway_refs: RwLock::new(HashMap::new()),
            predictions: RwLock::new(HashMap::new()),
            commission_runs: Mutex::new(HashMap::new()),
            vip_table,
            next_user_id: AtomicI64::new(1),
            next_prediction_id: AtomicI64::new(1),
            next_bet_id: AtomicI64::new(1),
            daily_bet_limit,
            lock_wait: Duration::from_millis(LOCK_WAIT_MS),
        }
    }

    async fn account_handle(&self, user_id: i64) -> Result<Arc<Mutex<Account>>, EngineError> {
        let accounts = self.accounts.read().await;
        accounts
            .get(&user_id)
            .cloned()
            .ok_or(EngineError::UserNotFound { user_id })
    }

    /// A lock that cannot be taken within the wait window surfaces as a
    /// transient `ConcurrencyConflict` instead of blocking forever.
    async fn lock_account(&self, user_id: i64) -> Result<OwnedMutexGuard<Account>, EngineError> {
        let handle = self.account_handle(user_id).await?;
        timeout(self.lock_wait, handle.lock_owned())
            .await
            .map_err(|_| EngineError::ConcurrencyConflict)
    }

    async fn prediction_handle(
        &self,
        prediction_id: i64,
    ) -> Result<Arc<Mutex<PredictionEntry>>, EngineError> {
        let predictions = self.predictions.read().await;
        predictions
            .get(&prediction_id)
            .cloned()
            .ok_or(EngineError::PredictionNotFound { prediction_id })
    }

    async fn lock_prediction(
        &self,
        prediction_id: i64,
    ) -> Result<OwnedMutexGuard<PredictionEntry>, EngineError> {
        let handle = self.prediction_handle(prediction_id).await?;
        timeout(self.lock_wait, handle.lock_owned())
            .await
            .map_err(|_| EngineError::ConcurrencyConflict)
    }

    // ---- registration and account management ----

    pub async fn register_user(
        &self,
        country: &str,
        referral_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RegisteredUser, EngineError> {
        if country.trim().is_empty() {
            return Err(EngineError::validation("country is required"));
        }

        let referrer_id = match referral_code {
            Some(code) => {
                let codes = self.codes.read().await;
                let id = codes.get(code.trim().to_uppercase().as_str()).copied();
                Some(id.ok_or_else(|| {
                    EngineError::validation(format!("unknown referral code: {}", code))
                })?)
            }
            None => None,
        };

        let user_id = self.next_user_id.fetch_add(1, Ordering::SeqCst);

        // the chain is fixed here, once, and never mutated afterward
        let ancestors = match referrer_id {
            Some(referrer_id) => {
                let mut referrer = self.lock_account(referrer_id).await?;
                let chain = referrals::chain_under(referrer_id, &referrer.ancestors);
                if referrals::would_cycle(user_id, &chain) {
                    return Err(EngineError::CyclicReferral);
                }
                referrer.referred_ids.push(user_id);
                chain
            }
            None => [None; 3],
        };

        let code = {
            let mut codes = self.codes.write().await;
            let code = loop {
                let candidate: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(REFERRAL_CODE_LEN)
                    .map(char::from)
                    .collect::<String>()
                    .to_uppercase();
                if !codes.contains_key(&candidate) {
                    break candidate;
                }
            };
            codes.insert(code.clone(), user_id);
            code
        };

        let account = Account::new(user_id, country.trim(), &code, ancestors, now);
        self.accounts
            .write()
            .await
            .insert(user_id, Arc::new(Mutex::new(account)));

        info!("Registered user {} (referrer: {:?})", user_id, referrer_id);
        Ok(RegisteredUser {
            user_id,
            referral_code: code,
            referrer_id,
            ancestors,
            created_at: now,
        })
    }

    pub async fn set_user_status(
        &self,
        user_id: i64,
        status: UserStatus,
    ) -> Result<(), EngineError> {
        let mut account = self.lock_account(user_id).await?;
        account.status = status;
        info!("User {} status set to {}", user_id, status.to_string());
        Ok(())
    }

    // ---- deposits and withdrawals ----

    /// Appends a pending deposit. The credit takes effect only when the
    /// gateway confirms it. The flag is false when `request_ref` replayed
    /// an earlier call.
    pub async fn deposit(
        &self,
        user_id: i64,
        amount: i64,
        request_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, bool), EngineError> {
        if amount <= 0 {
            return Err(EngineError::validation("deposit amount must be positive"));
        }
        let reference = gateway_reference("dep", request_ref)?;
        let mut account = self.lock_account(user_id).await?;
        if !account.is_active() {
            return Err(EngineError::AccountNotActive);
        }
        let (tx, fresh) =
            account.append_or_replay(TxType::DEPOSIT, amount, TxStatus::PENDING, &reference, now)?;
        drop(account);

        self.gateway_refs
            .write()
            .await
            .insert(reference, user_id);
        Ok((tx, fresh))
    }

    /// Appends a pending withdrawal hold; the funds leave the spendable
    /// balance immediately and come back only if the payout fails.
    pub async fn withdraw(
        &self,
        user_id: i64,
        amount: i64,
        request_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, bool), EngineError> {
        if amount <= 0 {
            return Err(EngineError::validation("withdrawal amount must be positive"));
        }
        let reference = gateway_reference("wd", request_ref)?;
        let mut account = self.lock_account(user_id).await?;
        if !account.is_active() {
            return Err(EngineError::AccountNotActive);
        }
        let (tx, fresh) = account.append_or_replay(
            TxType::WITHDRAWAL,
            -amount,
            TxStatus::PENDING,
            &reference,
            now,
        )?;
        drop(account);

        self.gateway_refs
            .write()
            .await
            .insert(reference, user_id);
        Ok((tx, fresh))
    }

    pub async fn confirm_deposit(
        &self,
        reference: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, EngineError> {
        let user_id = self.gateway_user(reference).await?;
        let mut account = self.lock_account(user_id).await?;
        match account.find_by_reference(reference).map(|tx| tx.tx_type) {
            Some(TxType::DEPOSIT) => {}
            _ => {
                return Err(EngineError::validation(format!(
                    "{} is not a deposit reference",
                    reference
                )));
            }
        }
        let (tx, changed) = account.resolve(reference, success)?;

        let mut commissions = Vec::new();
        let mut commissions_skipped = 0u32;
        if changed && success && !account.first_deposit_commission_paid {
            account.first_deposit_commission_paid = true;
            let ancestors = account.ancestors;
            // ancestors registered strictly earlier, so taking their locks
            // while holding this one cannot cycle
            for (idx, ancestor_id) in ancestors.iter().enumerate() {
                let Some(ancestor_id) = ancestor_id else {
                    continue;
                };
                let amount = bps_of(tx.amount, FIRST_DEPOSIT_COMMISSION_BPS[idx]);
                if amount <= 0 {
                    continue;
                }
                let commission_ref = format!("refdep:{}:{}", reference, idx + 1);
                match self
                    .credit_commission(*ancestor_id, user_id, (idx + 1) as u8, amount, &commission_ref, now)
                    .await
                {
                    Ok(CommissionCredit::Paid(payment)) => commissions.push(payment),
                    Ok(CommissionCredit::AlreadyPaid) => {}
                    Ok(CommissionCredit::SkippedInactive) => commissions_skipped += 1,
                    Err(err) => {
                        warn!(
                            "First-deposit commission {} to {} failed: {}",
                            commission_ref, ancestor_id, err
                        );
                    }
                }
            }
        }

        info!(
            "Deposit confirmation for {}: success={} changed={}",
            reference, success, changed
        );
        Ok(ConfirmOutcome {
            transaction: tx,
            changed,
            commissions,
            commissions_skipped,
        })
    }

    pub async fn confirm_withdrawal(
        &self,
        reference: &str,
        success: bool,
    ) -> Result<ConfirmOutcome, EngineError> {
        let user_id = self.gateway_user(reference).await?;
        let mut account = self.lock_account(user_id).await?;
        match account.find_by_reference(reference).map(|tx| tx.tx_type) {
            Some(TxType::WITHDRAWAL) => {}
            _ => {
                return Err(EngineError::validation(format!(
                    "{} is not a withdrawal reference",
                    reference
                )));
            }
        }
        let (tx, changed) = account.resolve(reference, success)?;
        info!(
            "Withdrawal confirmation for {}: success={} changed={}",
            reference, success, changed
        );
        Ok(ConfirmOutcome {
            transaction: tx,
            changed,
            commissions: Vec::new(),
            commissions_skipped: 0,
        })
    }

    async fn gateway_user(&self, reference: &str) -> Result<i64, EngineError> {
        let refs = self.gateway_refs.read().await;
        refs.get(reference).copied().ok_or_else(|| {
            EngineError::validation(format!("unknown reference: {}", reference))
        })
    }

    async fn credit_commission(
        &self,
        ancestor_id: i64,
        descendant_id: i64,
        level: u8,
        amount: i64,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<CommissionCredit, EngineError> {
        let mut ancestor = self.lock_account(ancestor_id).await?;
        if !ancestor.is_active() {
            info!(
                "Skipping commission {} for non-active ancestor {}",
                reference, ancestor_id
            );
            return Ok(CommissionCredit::SkippedInactive);
        }
        let (tx, fresh) = ancestor.append_or_replay(
            TxType::REFERRAL_COMMISSION,
            amount,
            TxStatus::COMPLETED,
            reference,
            now,
        )?;
        if !fresh {
            return Ok(CommissionCredit::AlreadyPaid);
        }
        Ok(CommissionCredit::Paid(CommissionPayment {
            ancestor_id,
            descendant_id,
            level,
            amount,
            transaction: tx,
        }))
    }

    // ---- reads ----

    pub async fn balance(&self, user_id: i64) -> Result<i64, EngineError> {
        let account = self.lock_account(user_id).await?;
        Ok(account.balance())
    }

    /// The eager counter and the log fold, side by side. They must agree;
    /// the service logs a mismatch as a data corruption signal.
    pub async fn audit_balance(&self, user_id: i64) -> Result<(i64, i64), EngineError> {
        let account = self.lock_account(user_id).await?;
        Ok((account.balance(), account.folded_balance()))
    }

    pub async fn vip_tier(&self, user_id: i64) -> Result<VipLevel, EngineError> {
        let account = self.lock_account(user_id).await?;
        Ok(self.vip_table.classify(account.balance()).clone())
    }

    pub fn vip_levels(&self) -> Vec<VipLevel> {
        self.vip_table.all()
    }

    pub async fn ledger(
        &self,
        user_id: i64,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>, EngineError> {
        let account = self.lock_account(user_id).await?;
        Ok(account
            .entries()
            .iter()
            .filter(|tx| {
                let date = tx.created_at.date_naive();
                from.map_or(true, |from| date >= from) && to.map_or(true, |to| date <= to)
            })
            .cloned()
            .collect())
    }

    pub async fn referral_stats(&self, user_id: i64) -> Result<ReferralStats, EngineError> {
        let account = self.lock_account(user_id).await?;
        Ok(referrals::stats_for(&account))
    }

    // ---- daily rewards ----

    pub async fn claim_daily_reward(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, EngineError> {
        let mut account = self.lock_account(user_id).await?;
        if !account.is_active() {
            return Err(EngineError::AccountNotActive);
        }
        rewards::claim(&mut account, now)
    }

    // ---- predictions ----

    pub async fn create_prediction(
        &self,
        new: NewPrediction,
        now: DateTime<Utc>,
    ) -> Result<Prediction, EngineError> {
        new.validate()?;
        let id = self.next_prediction_id.fetch_add(1, Ordering::SeqCst);
        let prediction = new.into_prediction(id, now);
        self.predictions.write().await.insert(
            id,
            Arc::new(Mutex::new(PredictionEntry {
                prediction: prediction.clone(),
                bets: Vec::new(),
            })),
        );
        info!("Created prediction {}", id);
        Ok(prediction)
    }

    /// Closing stops new bets. Closing an already-closed prediction is a
    /// no-op; a settled one is past closing.
    pub async fn close_prediction(&self, prediction_id: i64) -> Result<Prediction, EngineError> {
        let mut entry = self.lock_prediction(prediction_id).await?;
        match entry.prediction.status {
            PredictionStatus::ACTIVE => {
                entry.prediction.status = PredictionStatus::CLOSED;
                info!("Closed prediction {}", prediction_id);
                Ok(entry.prediction.clone())
            }
            PredictionStatus::CLOSED => Ok(entry.prediction.clone()),
            PredictionStatus::SETTLED => Err(EngineError::PredictionNotActive),
        }
    }

    pub async fn list_predictions(&self) -> Vec<Prediction> {
        let handles: Vec<_> = {
            let predictions = self.predictions.read().await;
            predictions.values().cloned().collect()
        };
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.lock().await.prediction.clone());
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub async fn prediction(&self, prediction_id: i64) -> Result<Prediction, EngineError> {
        let entry = self.lock_prediction(prediction_id).await?;
        Ok(entry.prediction.clone())
    }

    pub async fn bets(&self, prediction_id: i64) -> Result<Vec<Bet>, EngineError> {
        let entry = self.lock_prediction(prediction_id).await?;
        Ok(entry.bets.clone())
    }

    /// Slot picks the stake percentage; the stake itself is re-derived
    /// from the pre-debit balance and the VIP table, never read from the
    /// request.
    pub async fn place_bet(
        &self,
        user_id: i64,
        prediction_id: i64,
        slot: BetSlot,
        now: DateTime<Utc>,
    ) -> Result<PlacedBet, EngineError> {
        let mut entry = self.lock_prediction(prediction_id).await?;
        if entry.prediction.status != PredictionStatus::ACTIVE {
            return Err(EngineError::PredictionNotActive);
        }

        let mut account = self.lock_account(user_id).await?;
        if !account.is_active() {
            return Err(EngineError::AccountNotActive);
        }
        let today = now.date_naive();
        if account.daily_bets.get(&today).copied().unwrap_or(0) >= self.daily_bet_limit {
            return Err(EngineError::DailyBetLimitExceeded);
        }

        let balance = account.balance();
        let tier = self.vip_table.classify(balance);
        let stake = stake_for(
            balance,
            tier,
            slot,
            entry.prediction.min_bet,
            entry.prediction.max_bet,
        );

        let bet_id = self.next_bet_id.fetch_add(1, Ordering::SeqCst);
        let reference = format!("bet:{}", bet_id);
        let stake_tx =
            account.append(TxType::BET_PLACED, -stake, TxStatus::COMPLETED, &reference, now)?;
        *account.daily_bets.entry(today).or_insert(0) += 1;

        let bet = Bet {
            id: bet_id,
            user_id,
            prediction_id,
            slot,
            amount: stake,
            odds_x100: entry.prediction.odds_x100,
            status: BetStatus::PENDING,
            placed_on: today,
            created_at: now,
        };
        entry.bets.push(bet.clone());

        info!(
            "User {} placed bet {} on prediction {} (stake {})",
            user_id, bet_id, prediction_id, stake
        );
        Ok(PlacedBet { bet, stake: stake_tx })
    }

    /// Posts the result and pays every pending bet. A repeat call with the
    /// same result only touches bets still pending (normally none), so
    /// settling twice is indistinguishable from settling once.
    pub async fn settle_prediction(
        &self,
        prediction_id: i64,
        result: MatchOutcome,
        now: DateTime<Utc>,
    ) -> Result<SettlementSummary, EngineError> {
        let mut entry = self.lock_prediction(prediction_id).await?;
        match entry.prediction.status {
            // posting a result means the match ended; an active prediction
            // closes implicitly
            PredictionStatus::ACTIVE | PredictionStatus::CLOSED => {
                entry.prediction.status = PredictionStatus::SETTLED;
                entry.prediction.result = Some(result);
            }
            PredictionStatus::SETTLED => {
                if entry.prediction.result != Some(result) {
                    return Err(EngineError::validation(format!(
                        "prediction {} already settled with a different result",
                        prediction_id
                    )));
                }
            }
        }

        let PredictionEntry { prediction, bets } = &mut *entry;
        let mut summary = SettlementSummary {
            prediction: prediction.clone(),
            won: 0,
            lost: 0,
            refunded: 0,
            skipped: 0,
            failed: 0,
            bets: Vec::new(),
        };

        for bet in bets.iter_mut() {
            if bet.status != BetStatus::PENDING {
                summary.skipped += 1;
                continue;
            }
            match self.settle_bet(prediction, bet, result, now).await {
                Ok(settled) => {
                    match settled.bet.status {
                        BetStatus::WON => summary.won += 1,
                        BetStatus::LOST => summary.lost += 1,
                        BetStatus::REFUNDED => summary.refunded += 1,
                        BetStatus::PENDING => {}
                    }
                    summary.bets.push(settled);
                }
                Err(err) => {
                    warn!("Settling bet {} failed: {}", bet.id, err);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Settled prediction {}: {} won, {} lost, {} refunded, {} skipped, {} failed",
            prediction_id, summary.won, summary.lost, summary.refunded, summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    async fn settle_bet(
        &self,
        prediction: &Prediction,
        bet: &mut Bet,
        result: MatchOutcome,
        now: DateTime<Utc>,
    ) -> Result<SettledBet, EngineError> {
        let mut account = self.lock_account(bet.user_id).await?;
        let mut transactions = Vec::new();

        if prediction.predicted_outcome == result {
            let payout = win_payout(bet.amount, bet.odds_x100);
            let reference = format!("betwin:{}", bet.id);
            let (tx, fresh) = account.append_or_replay(
                TxType::BET_WON,
                payout,
                TxStatus::COMPLETED,
                &reference,
                now,
            )?;
            if fresh {
                transactions.push(tx);
            }
            bet.status = BetStatus::WON;
        } else {
            // the stake stays lost; the marker keeps the settlement visible
            // in the ledger even when no money moves
            let noop_ref = format!("betlost:{}", bet.id);
            let (noop, fresh) = account.append_or_replay(
                TxType::BET_LOST_NOOP,
                0,
                TxStatus::COMPLETED,
                &noop_ref,
                now,
            )?;
            if fresh {
                transactions.push(noop);
            }

            let refund = bps_of(bet.amount, prediction.refund_bps);
            if refund > 0 {
                let refund_ref = format!("betref:{}", bet.id);
                let (tx, fresh) = account.append_or_replay(
                    TxType::REFUND,
                    refund,
                    TxStatus::COMPLETED,
                    &refund_ref,
                    now,
                )?;
                if fresh {
                    transactions.push(tx);
                }
                bet.status = BetStatus::REFUNDED;
                // refunded bets stop counting against the daily cap
                if let Some(count) = account.daily_bets.get_mut(&bet.placed_on) {
                    *count = count.saturating_sub(1);
                }
            } else {
                bet.status = BetStatus::LOST;
            }
        }

        Ok(SettledBet {
            bet: bet.clone(),
            transactions,
        })
    }

    /// Maintenance pass: closes active predictions past their match date
    /// and retries settlements that left bets pending. Cancellation is
    /// honored between predictions.
    pub async fn settlement_sweep(&self, now: DateTime<Utc>, cancel: &AtomicBool) -> SweepSummary {
        let mut handles: Vec<_> = {
            let predictions = self.predictions.read().await;
            predictions.iter().map(|(id, h)| (*id, h.clone())).collect()
        };
        handles.sort_by_key(|(id, _)| *id);

        let mut summary = SweepSummary::default();
        for (prediction_id, handle) in handles {
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                break;
            }

            enum Action {
                Closed(Prediction),
                Resettle(MatchOutcome),
                Nothing,
            }

            let action = {
                let mut entry = handle.lock().await;
                match entry.prediction.status {
                    PredictionStatus::ACTIVE if entry.prediction.match_date <= now => {
                        entry.prediction.status = PredictionStatus::CLOSED;
                        Action::Closed(entry.prediction.clone())
                    }
                    PredictionStatus::SETTLED
                        if entry.bets.iter().any(|b| b.status == BetStatus::PENDING) =>
                    {
                        match entry.prediction.result {
                            Some(result) => Action::Resettle(result),
                            None => Action::Nothing,
                        }
                    }
                    _ => Action::Nothing,
                }
            };

            match action {
                Action::Closed(prediction) => {
                    info!("Closed prediction {} past its match date", prediction_id);
                    summary.closed.push(prediction);
                }
                Action::Resettle(result) => {
                    match self.settle_prediction(prediction_id, result, now).await {
                        Ok(settlement) => summary.settlements.push(settlement),
                        Err(err) => {
                            warn!("Sweep settlement of prediction {} failed: {}", prediction_id, err);
                            summary.failed += 1;
                        }
                    }
                }
                Action::Nothing => {}
            }
        }
        summary
    }

    // ---- weekly commissions ----

    /// Pays the trailing-window wager commission for every user, at most
    /// once per (user, period). Reruns skip users already paid, so a run
    /// interrupted by a crash or cancellation picks up where it left off.
    pub async fn run_weekly_commissions(
        &self,
        now: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> CommissionRunSummary {
        let period = referrals::period_key(now);
        let resume_from = {
            let mut runs = self.commission_runs.lock().await;
            let run = runs.entry(period.clone()).or_insert_with(|| CommissionRun {
                period: period.clone(),
                last_processed_user: None,
                processed: 0,
                failed: 0,
                skipped: 0,
                finished: false,
                started_at: now,
            });
            if run.finished {
                // an explicit rerun re-walks everyone; paid flags make the
                // walk a no-op except for users that previously failed
                run.last_processed_user = None;
                run.finished = false;
                run.processed = 0;
                run.failed = 0;
                run.skipped = 0;
            }
            run.last_processed_user
        };

        let mut user_ids: Vec<i64> = {
            let accounts = self.accounts.read().await;
            accounts.keys().copied().collect()
        };
        user_ids.sort_unstable();
        if let Some(resume_from) = resume_from {
            user_ids.retain(|id| *id > resume_from);
        }

        let cutoff = now - chrono::Duration::days(WAGER_WINDOW_DAYS);
        let mut processed = 0u32;
        let mut failed = 0u32;
        let mut skipped = 0u32;
        let mut cancelled = false;
        let mut payments = Vec::new();

        for user_id in user_ids {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
            match self.commission_for_user(user_id, &period, cutoff, now).await {
                Ok((user_payments, user_skipped)) => {
                    processed += 1;
                    skipped += user_skipped;
                    payments.extend(user_payments);
                }
                Err(err) => {
                    warn!("Weekly commission pass for user {} in {} failed: {}", user_id, period, err);
                    failed += 1;
                }
            }
            // checkpoint even on failure so one bad account cannot wedge
            // the run
            let mut runs = self.commission_runs.lock().await;
            if let Some(run) = runs.get_mut(&period) {
                run.last_processed_user = Some(user_id);
            }
        }

        let run = {
            let mut runs = self.commission_runs.lock().await;
            let run = runs.entry(period.clone()).or_insert_with(|| CommissionRun {
                period: period.clone(),
                last_processed_user: None,
                processed: 0,
                failed: 0,
                skipped: 0,
                finished: false,
                started_at: now,
            });
            run.processed += processed;
            run.failed += failed;
            run.skipped += skipped;
            run.finished = !cancelled;
            run.clone()
        };

        info!(
            "Weekly commission run {}: {} processed, {} failed, {} skipped, {} payments, cancelled={}",
            period,
            processed,
            failed,
            skipped,
            payments.len(),
            cancelled
        );
        CommissionRunSummary {
            period,
            processed,
            failed,
            skipped,
            finished: run.finished,
            cancelled,
            payments,
            run,
        }
    }

    async fn commission_for_user(
        &self,
        user_id: i64,
        period: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<CommissionPayment>, u32), EngineError> {
        let (volume, ancestors) = {
            let account = self.lock_account(user_id).await?;
            if account.paid_commission_periods.contains(period) {
                return Ok((Vec::new(), 0));
            }
            (account.wager_volume_since(cutoff), account.ancestors)
        };

        let mut payments = Vec::new();
        let mut skipped = 0u32;
        if volume > 0 {
            for (idx, ancestor_id) in ancestors
                .iter()
                .enumerate()
                .take(WEEKLY_COMMISSION_BPS.len())
            {
                let Some(ancestor_id) = ancestor_id else {
                    continue;
                };
                let amount = bps_of(volume, WEEKLY_COMMISSION_BPS[idx]);
                if amount <= 0 {
                    continue;
                }
                let reference = format!("wkcom:{}:{}:{}", period, user_id, idx + 1);
                match self
                    .credit_commission(*ancestor_id, user_id, (idx + 1) as u8, amount, &reference, now)
                    .await
                {
                    Ok(CommissionCredit::Paid(payment)) => payments.push(payment),
                    Ok(CommissionCredit::AlreadyPaid) => {}
                    Ok(CommissionCredit::SkippedInactive) => skipped += 1,
                    Err(err) => {
                        warn!(
                            "Weekly commission {} to {} failed: {}",
                            reference, ancestor_id, err
                        );
                    }
                }
            }
        }

        self.lock_account(user_id)
            .await?
            .paid_commission_periods
            .insert(period.to_string());
        Ok((payments, skipped))
    }

    pub async fn commission_run(&self, period: &str) -> Option<CommissionRun> {
        let runs = self.commission_runs.lock().await;
        runs.get(period).cloned()
    }

    // ---- hydration ----

    /// Rebuilds the full in-memory state from persisted rows. Replays the
    /// ledger in global append order through the same effective-amount
    /// rule the live path uses, so the rebuilt counters match the folds.
    pub fn hydrate(
        vip_rows: &[rows::VipLevel],
        user_rows: &[rows::User],
        referral_rows: &[rows::Referral],
        streak_rows: &[rows::DailyStreak],
        tx_rows: &[rows::Transaction],
        prediction_rows: &[rows::Prediction],
        bet_rows: &[rows::PredictionBet],
        run_rows: &[rows::CommissionRun],
        daily_bet_limit: u32,
    ) -> anyhow::Result<Engine> {
        let vip_table = if vip_rows.is_empty() {
            VipTable::default()
        } else {
            let levels = vip_rows
                .iter()
                .map(|row| VipLevel {
                    level: row.level as u8,
                    min_balance: row.min_balance,
                    max_balance: row.max_balance,
                    daily_reward: row.daily_reward,
                    first_bet_bps: row.first_bet_bps as u32,
                    second_bet_bps: row.second_bet_bps as u32,
                    referral_bonus_bps: row.referral_bonus_bps as u32,
                })
                .collect();
            VipTable::new(levels)?
        };

        let mut accounts: HashMap<i64, Account> = HashMap::new();
        let mut codes = HashMap::new();
        let mut next_user_id = 1i64;
        for row in user_rows {
            let mut account = Account::new(
                row.id,
                &row.country,
                &row.referral_code,
                [None; 3],
                row.created_at,
            );
            account.status = row.status.parse()?;
            codes.insert(row.referral_code.clone(), row.id);
            next_user_id = next_user_id.max(row.id + 1);
            accounts.insert(row.id, account);
        }

        for row in referral_rows {
            if !(1..=3).contains(&row.level) {
                anyhow::bail!("referral level out of range: {}", row.level);
            }
            if let Some(account) = accounts.get_mut(&row.referred_id) {
                account.ancestors[row.level as usize - 1] = Some(row.referrer_id);
            }
            if row.level == 1 {
                if let Some(referrer) = accounts.get_mut(&row.referrer_id) {
                    referrer.referred_ids.push(row.referred_id);
                }
            }
        }

        for row in streak_rows {
            if let Some(account) = accounts.get_mut(&row.user_id) {
                account.last_claim_date = row.last_claim_date;
                account.streak_count = row.streak_count as u32;
                account.milestones_paid =
                    row.milestones_paid.iter().map(|m| *m as u32).collect();
            }
        }

        let mut gateway_refs = HashMap::new();
        for row in tx_rows {
            let tx_type: TxType = row.tx_type.parse()?;
            let status: TxStatus = row.status.parse()?;
            let account = accounts
                .get_mut(&row.user_id)
                .ok_or_else(|| anyhow::anyhow!("transaction for unknown user {}", row.user_id))?;
            account.restore_entry(Transaction {
                id: row.id.clone(),
                user_id: row.user_id,
                tx_type,
                amount: row.amount,
                balance_before: row.balance_before,
                balance_after: row.balance_after,
                status,
                reference: row.reference.clone(),
                created_at: row.created_at,
            });
            if matches!(tx_type, TxType::DEPOSIT | TxType::WITHDRAWAL) {
                gateway_refs.insert(row.reference.clone(), row.user_id);
            }
            if tx_type == TxType::DEPOSIT && status == TxStatus::COMPLETED {
                account.first_deposit_commission_paid = true;
            }
            // a claim the streak row never caught up with is replayed
            // through the same transition the live path uses
            if let Some(rest) = row.reference.strip_prefix("daily:") {
                let parts: Vec<&str> = rest.split(':').collect();
                if parts.len() == 2 {
                    if let Ok(date) = parts[1].parse::<NaiveDate>() {
                        if account.last_claim_date.map_or(true, |last| date > last) {
                            account.streak_count = match account.last_claim_date {
                                Some(last) if date - last == chrono::Duration::days(1) => {
                                    account.streak_count + 1
                                }
                                _ => 1,
                            };
                            account.last_claim_date = Some(date);
                        }
                    }
                }
            }
            if let Some(rest) = row.reference.strip_prefix("milestone:") {
                let parts: Vec<&str> = rest.split(':').collect();
                if parts.len() == 2 {
                    if let Ok(threshold) = parts[1].parse::<u32>() {
                        account.milestones_paid.insert(threshold);
                    }
                }
            }
            // paid periods come back from the commission references
            if let Some(rest) = row.reference.strip_prefix("wkcom:") {
                let parts: Vec<&str> = rest.split(':').collect();
                if parts.len() == 3 {
                    if let Some(wagerer) = parts[1]
                        .parse::<i64>()
                        .ok()
                        .and_then(|id| accounts.get_mut(&id))
                    {
                        wagerer
                            .paid_commission_periods
                            .insert(parts[0].to_string());
                    }
                }
            }
        }

        let mut predictions = HashMap::new();
        let mut next_prediction_id = 1i64;
        for row in prediction_rows {
            let prediction = Prediction {
                id: row.id,
                home_team: row.home_team.clone(),
                away_team: row.away_team.clone(),
                league: row.league.clone(),
                match_date: row.match_date,
                predicted_outcome: row.predicted_outcome.parse()?,
                confidence: row.confidence as u8,
                odds_x100: row.odds_x100 as u32,
                refund_bps: row.refund_bps as u32,
                min_bet: row.min_bet,
                max_bet: row.max_bet,
                status: row.status.parse()?,
                result: row.result.as_deref().map(str::parse).transpose()?,
                created_at: row.created_at,
            };
            next_prediction_id = next_prediction_id.max(row.id + 1);
            predictions.insert(
                row.id,
                PredictionEntry {
                    prediction,
                    bets: Vec::new(),
                },
            );
        }

        let mut next_bet_id = 1i64;
        for row in bet_rows {
            let bet = Bet {
                id: row.id,
                user_id: row.user_id,
                prediction_id: row.prediction_id,
                slot: row.slot.parse()?,
                amount: row.amount,
                odds_x100: row.odds_x100 as u32,
                status: row.status.parse()?,
                placed_on: row.placed_on,
                created_at: row.created_at,
            };
            next_bet_id = next_bet_id.max(row.id + 1);
            if bet.status != BetStatus::REFUNDED {
                if let Some(account) = accounts.get_mut(&bet.user_id) {
                    *account.daily_bets.entry(bet.placed_on).or_insert(0) += 1;
                }
            }
            let entry = predictions
                .get_mut(&bet.prediction_id)
                .ok_or_else(|| anyhow::anyhow!("bet for unknown prediction {}", bet.prediction_id))?;
            entry.bets.push(bet);
        }

        let commission_runs = run_rows
            .iter()
            .map(|row| {
                (
                    row.period.clone(),
                    CommissionRun {
                        period: row.period.clone(),
                        last_processed_user: row.last_processed_user,
                        processed: row.processed as u32,
                        failed: row.failed as u32,
                        skipped: row.skipped as u32,
                        finished: row.finished,
                        started_at: row.started_at,
                    },
                )
            })
            .collect();

        Ok(Engine {
            accounts: RwLock::new(
                accounts
                    .into_iter()
                    .map(|(id, account)| (id, Arc::new(Mutex::new(account))))
                    .collect(),
            ),
            codes: RwLock::new(codes),
            gateway_refs: RwLock::new(gateway_refs),
            predictions: RwLock::new(
                predictions
                    .into_iter()
                    .map(|(id, entry)| (id, Arc::new(Mutex::new(entry))))
                    .collect(),
            ),
            commission_runs: Mutex::new(commission_runs),
            vip_table,
            next_user_id: AtomicI64::new(next_user_id),
            next_prediction_id: AtomicI64::new(next_prediction_id),
            next_bet_id: AtomicI64::new(next_bet_id),
            daily_bet_limit,
            lock_wait: Duration::from_millis(LOCK_WAIT_MS),
        })
    }
}
