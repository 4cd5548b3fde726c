use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::utils::{TxStatus, TxType};
use serde::Serialize;

use crate::constants::{DAILY_REWARD_TABLE, STREAK_MILESTONES};
use crate::errors::EngineError;
use crate::ledger::{Account, Transaction};

#[derive(Debug, Clone, Serialize)]
pub struct ClaimOutcome {
    pub reward: Transaction,
    pub streak_count: u32,
    pub last_claim_date: NaiveDate,
    pub milestone_bonus: Option<Transaction>,
    pub milestones_paid: Vec<u32>,
}

/// Table position for a streak count; the cycle wraps after 30 days.
pub fn reward_for_streak(streak: u32) -> i64 {
    DAILY_REWARD_TABLE[((streak - 1) % 30) as usize]
}

/// One claim per calendar day. A missed day resets the streak to 1; the
/// reward grant and the streak update happen inside the caller's critical
/// section, so a claim is all-or-nothing.
pub fn claim(account: &mut Account, now: DateTime<Utc>) -> Result<ClaimOutcome, EngineError> {
    let today = now.date_naive();
    if account.last_claim_date == Some(today) {
        return Err(EngineError::AlreadyClaimed);
    }

    let streak = match account.last_claim_date {
        Some(last) if today - last == Duration::days(1) => account.streak_count + 1,
        _ => 1,
    };

    let amount = reward_for_streak(streak);
    let reference = format!("daily:{}:{}", account.user_id, today);
    let reward = account.append(TxType::DAILY_REWARD, amount, TxStatus::COMPLETED, &reference, now)?;
    account.last_claim_date = Some(today);
    account.streak_count = streak;

    // milestones fire on the first crossing only; a rebuilt streak can
    // reach future thresholds but never re-trigger a paid one
    let mut milestone_bonus = None;
    for (threshold, bonus) in STREAK_MILESTONES {
        if streak == threshold && !account.milestones_paid.contains(&threshold) {
            let reference = format!("milestone:{}:{}", account.user_id, threshold);
            let tx = account.append(TxType::BONUS, bonus, TxStatus::COMPLETED, &reference, now)?;
            account.milestones_paid.insert(threshold);
            milestone_bonus = Some(tx);
        }
    }

    let mut milestones_paid: Vec<u32> = account.milestones_paid.iter().copied().collect();
    milestones_paid.sort_unstable();

    Ok(ClaimOutcome {
        reward,
        streak_count: streak,
        last_claim_date: today,
        milestone_bonus,
        milestones_paid,
    })
}
