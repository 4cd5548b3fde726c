use chrono::{DateTime, Datelike, Utc};
use common::utils::{TxStatus, TxType};
use serde::Serialize;

use crate::ledger::Account;

/// Commission-period key: ISO week of the run instant, e.g. `2026-W34`.
pub fn period_key(now: DateTime<Utc>) -> String {
    let week = now.date_naive().iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Ancestor chain for a user referred by `referrer_id`: the referrer
/// becomes the level-1 ancestor and the referrer's first two ancestors
/// shift down to levels 2 and 3.
pub fn chain_under(referrer_id: i64, referrer_ancestors: &[Option<i64>; 3]) -> [Option<i64>; 3] {
    [Some(referrer_id), referrer_ancestors[0], referrer_ancestors[1]]
}

/// The chain is a tree, never a graph: a new member must not already sit
/// in its own upline.
pub fn would_cycle(new_user_id: i64, chain: &[Option<i64>; 3]) -> bool {
    chain.iter().flatten().any(|id| *id == new_user_id)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralStats {
    pub user_id: i64,
    pub referral_code: String,
    pub direct_referrals: u32,
    pub referred_ids: Vec<i64>,
    pub earned_by_level: [i64; 3],
    pub total_earned: i64,
}

/// Commission references end in `:{level}`; anything else is not a
/// commission credit.
fn commission_level(reference: &str) -> Option<usize> {
    let level: usize = reference.rsplit(':').next()?.parse().ok()?;
    (1..=3).contains(&level).then_some(level)
}

/// Earnings are a fold over the account's `referral_commission` credits,
/// attributed to levels by reference suffix.
pub fn stats_for(account: &Account) -> ReferralStats {
    let mut earned_by_level = [0i64; 3];
    for tx in account.entries() {
        if tx.tx_type == TxType::REFERRAL_COMMISSION && tx.status == TxStatus::COMPLETED {
            if let Some(level) = commission_level(&tx.reference) {
                earned_by_level[level - 1] += tx.amount;
            }
        }
    }

    ReferralStats {
        user_id: account.user_id,
        referral_code: account.referral_code.clone(),
        direct_referrals: account.referred_ids.len() as u32,
        referred_ids: account.referred_ids.clone(),
        total_earned: earned_by_level.iter().sum(),
        earned_by_level,
    }
}
