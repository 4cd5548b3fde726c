use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

// Ledger Metrics
lazy_static! {
    pub static ref TRANSACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "wallet_transactions_total",
        "Ledger entries recorded, by transaction type",
        &["tx_type"]
    )
    .unwrap();
    pub static ref BALANCE_MISMATCHES: IntCounter = register_int_counter!(
        "wallet_balance_mismatches_total",
        "Balance audits where the running counter disagreed with the ledger fold"
    )
    .unwrap();
    pub static ref WEBHOOK_REJECTIONS: IntCounter = register_int_counter!(
        "wallet_webhook_rejections_total",
        "Gateway webhooks rejected for a bad signature"
    )
    .unwrap();
}

// Betting Metrics
lazy_static! {
    pub static ref USERS_REGISTERED: IntCounter =
        register_int_counter!("wallet_users_registered_total", "Total accounts created").unwrap();
    pub static ref BETS_PLACED: IntCounter =
        register_int_counter!("wallet_bets_placed_total", "Total bets placed").unwrap();
    pub static ref BETS_SETTLED: IntCounterVec = register_int_counter_vec!(
        "wallet_bets_settled_total",
        "Bets settled, by outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref DAILY_REWARDS_CLAIMED: IntCounter = register_int_counter!(
        "wallet_daily_rewards_claimed_total",
        "Daily streak rewards claimed"
    )
    .unwrap();
}

// Commission Metrics
lazy_static! {
    pub static ref COMMISSIONS_PAID: IntCounterVec = register_int_counter_vec!(
        "wallet_commissions_paid_total",
        "Referral commissions credited, by chain level",
        &["level"]
    )
    .unwrap();
    pub static ref COMMISSIONS_SKIPPED: IntCounter = register_int_counter!(
        "wallet_commissions_skipped_total",
        "Referral commissions withheld from a non-active ancestor"
    )
    .unwrap();
    pub static ref COMMISSION_RUN_PROCESSED: IntGauge = register_int_gauge!(
        "wallet_commission_run_processed",
        "Users processed by the latest weekly commission run"
    )
    .unwrap();
    pub static ref COMMISSION_RUN_FAILED: IntGauge = register_int_gauge!(
        "wallet_commission_run_failed",
        "Users that failed in the latest weekly commission run"
    )
    .unwrap();
}

// Helper functions to update metrics
pub fn record_transaction(tx_type: &str) {
    TRANSACTIONS_TOTAL.with_label_values(&[tx_type]).inc();
}

pub fn record_balance_mismatch() {
    BALANCE_MISMATCHES.inc();
}

pub fn record_webhook_rejection() {
    WEBHOOK_REJECTIONS.inc();
}

pub fn record_registration() {
    USERS_REGISTERED.inc();
}

pub fn record_bet_placed() {
    BETS_PLACED.inc();
}

pub fn record_settlements(outcome: &str, count: u64) {
    BETS_SETTLED.with_label_values(&[outcome]).inc_by(count);
}

pub fn record_daily_reward() {
    DAILY_REWARDS_CLAIMED.inc();
}

pub fn record_commission(level: u8) {
    let level = level.to_string();
    COMMISSIONS_PAID.with_label_values(&[level.as_str()]).inc();
}

pub fn record_commissions_skipped(count: u64) {
    COMMISSIONS_SKIPPED.inc_by(count);
}

pub fn record_commission_run(processed: u32, failed: u32) {
    COMMISSION_RUN_PROCESSED.set(processed as i64);
    COMMISSION_RUN_FAILED.set(failed as i64);
}
