use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use common::models as rows;
use common::utils::{BetSlot, MatchOutcome, PredictionStatus, TxType, UserStatus};

use crate::constants::DEFAULT_DAILY_BET_LIMIT;
use crate::engine::Engine;
use crate::errors::EngineError;
use crate::predictions::NewPrediction;
use crate::vip::VipTable;

fn ts(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

fn engine() -> Engine {
    Engine::new(VipTable::default(), DEFAULT_DAILY_BET_LIMIT)
}

fn pick(min_bet: i64, max_bet: i64, refund_bps: u32, odds_x100: u32) -> NewPrediction {
    NewPrediction {
        home_team: "Coton Sport".to_string(),
        away_team: "Colombe du Sud".to_string(),
        league: "Elite One".to_string(),
        match_date: ts(2026, 3, 14, 18),
        predicted_outcome: MatchOutcome::HOME_WIN,
        confidence: 3,
        odds_x100,
        refund_bps,
        min_bet,
        max_bet,
    }
}

async fn funded(engine: &Engine, amount: i64, now: DateTime<Utc>) -> i64 {
    let user = engine
        .register_user("CM", None, now)
        .await
        .unwrap()
        .user_id;
    let (tx, _) = engine.deposit(user, amount, None, now).await.unwrap();
    engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    user
}

// ---- deposits, withdrawals, pending accounting ----

#[tokio::test]
async fn pending_deposit_is_not_spendable_until_confirmed() {
    let engine = engine();
    let now = ts(2026, 2, 1, 9);
    let user = engine
        .register_user("CM", None, now)
        .await
        .unwrap()
        .user_id;

    let (tx, fresh) = engine.deposit(user, 5_000, None, now).await.unwrap();
    assert!(fresh);
    assert_eq!(engine.balance(user).await.unwrap(), 0);

    let err = engine.withdraw(user, 1_000, None, now).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));

    let outcome = engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(engine.balance(user).await.unwrap(), 5_000);

    // a replayed webhook changes nothing
    let replay = engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    assert!(!replay.changed);
    assert_eq!(engine.balance(user).await.unwrap(), 5_000);
}

#[tokio::test]
async fn failed_withdrawal_releases_the_hold() {
    let engine = engine();
    let now = ts(2026, 2, 1, 9);
    let user = funded(&engine, 10_000, now).await;

    let (tx, _) = engine.withdraw(user, 4_000, None, now).await.unwrap();
    assert_eq!(engine.balance(user).await.unwrap(), 6_000);

    let outcome = engine
        .confirm_withdrawal(&tx.reference, false)
        .await
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(engine.balance(user).await.unwrap(), 10_000);

    let (eager, folded) = engine.audit_balance(user).await.unwrap();
    assert_eq!(eager, folded);
}

#[tokio::test]
async fn client_reference_replays_the_original_transaction() {
    let engine = engine();
    let now = ts(2026, 2, 1, 9);
    let user = engine
        .register_user("CM", None, now)
        .await
        .unwrap()
        .user_id;

    let (first, fresh) = engine
        .deposit(user, 2_500, Some("order-77".to_string()), now)
        .await
        .unwrap();
    assert!(fresh);
    let (second, fresh) = engine
        .deposit(user, 2_500, Some("order-77".to_string()), now)
        .await
        .unwrap();
    assert!(!fresh);
    assert_eq!(first.id, second.id);

    let err = engine
        .deposit(user, 100, Some("   ".to_string()), now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn webhook_for_unknown_reference_is_rejected() {
    let engine = engine();
    let err = engine
        .confirm_deposit("dep:never-seen", true, ts(2026, 2, 1, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn ledger_counter_matches_fold_through_mixed_activity() {
    let engine = engine();
    let day1 = ts(2026, 2, 1, 9);
    let day2 = ts(2026, 2, 2, 9);
    let user = funded(&engine, 120_000, day1).await;

    let (wd, _) = engine.withdraw(user, 15_000, None, day1).await.unwrap();
    engine.confirm_withdrawal(&wd.reference, true).await.unwrap();

    let (wd, _) = engine.withdraw(user, 9_000, None, day1).await.unwrap();
    engine
        .confirm_withdrawal(&wd.reference, false)
        .await
        .unwrap();

    engine.claim_daily_reward(user, day1).await.unwrap();
    engine.claim_daily_reward(user, day2).await.unwrap();

    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), day2)
        .await
        .unwrap();
    engine
        .place_bet(user, prediction.id, BetSlot::FIRST, day2)
        .await
        .unwrap();
    engine
        .settle_prediction(prediction.id, MatchOutcome::HOME_WIN, day2)
        .await
        .unwrap();

    // one deposit still pending on top
    engine.deposit(user, 7_777, None, day2).await.unwrap();

    let (eager, folded) = engine.audit_balance(user).await.unwrap();
    assert_eq!(eager, folded);

    let entries = engine.ledger(user, None, None).await.unwrap();
    assert!(entries.len() >= 7);
}

// ---- account status ----

#[tokio::test]
async fn suspended_account_rejects_money_movement() {
    let engine = engine();
    let now = ts(2026, 2, 1, 9);
    let user = funded(&engine, 50_000, now).await;
    engine
        .set_user_status(user, UserStatus::SUSPENDED)
        .await
        .unwrap();

    let err = engine.deposit(user, 1_000, None, now).await.unwrap_err();
    assert!(matches!(err, EngineError::AccountNotActive));
    let err = engine.withdraw(user, 1_000, None, now).await.unwrap_err();
    assert!(matches!(err, EngineError::AccountNotActive));
    let err = engine.claim_daily_reward(user, now).await.unwrap_err();
    assert!(matches!(err, EngineError::AccountNotActive));

    // reads still work while suspended
    assert_eq!(engine.balance(user).await.unwrap(), 50_000);

    engine
        .set_user_status(user, UserStatus::ACTIVE)
        .await
        .unwrap();
    engine.claim_daily_reward(user, now).await.unwrap();
}

// ---- daily rewards ----

#[tokio::test]
async fn streak_grows_daily_and_resets_after_a_gap() {
    let engine = engine();
    let user = funded(&engine, 10_000, ts(2026, 2, 1, 8)).await;

    let day1 = engine
        .claim_daily_reward(user, ts(2026, 2, 1, 9))
        .await
        .unwrap();
    assert_eq!(day1.streak_count, 1);
    assert_eq!(day1.reward.amount, 100);

    let day2 = engine
        .claim_daily_reward(user, ts(2026, 2, 2, 9))
        .await
        .unwrap();
    assert_eq!(day2.streak_count, 2);
    assert_eq!(day2.reward.amount, 125);

    let err = engine
        .claim_daily_reward(user, ts(2026, 2, 2, 23))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyClaimed));

    // february 3rd missed
    let day4 = engine
        .claim_daily_reward(user, ts(2026, 2, 4, 9))
        .await
        .unwrap();
    assert_eq!(day4.streak_count, 1);
    assert_eq!(day4.reward.amount, 100);
}

// ---- referral commissions ----

#[tokio::test]
async fn first_deposit_pays_three_levels_up_the_chain() {
    let engine = engine();
    let now = ts(2026, 2, 1, 9);

    let a = engine.register_user("CM", None, now).await.unwrap();
    let b = engine
        .register_user("CM", Some(&a.referral_code), now)
        .await
        .unwrap();
    let c = engine
        .register_user("CM", Some(&b.referral_code), now)
        .await
        .unwrap();
    let d = engine
        .register_user("CM", Some(&c.referral_code), now)
        .await
        .unwrap();
    assert_eq!(d.ancestors, [Some(c.user_id), Some(b.user_id), Some(a.user_id)]);

    let (tx, _) = engine.deposit(d.user_id, 100_000, None, now).await.unwrap();
    let outcome = engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    assert_eq!(outcome.commissions.len(), 3);
    assert_eq!(engine.balance(c.user_id).await.unwrap(), 3_000);
    assert_eq!(engine.balance(b.user_id).await.unwrap(), 2_000);
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 1_000);
    assert_eq!(engine.balance(d.user_id).await.unwrap(), 100_000);

    // replaying the webhook never pays twice
    let replay = engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    assert!(replay.commissions.is_empty());
    assert_eq!(engine.balance(c.user_id).await.unwrap(), 3_000);

    // a second deposit is not a first deposit
    let (tx, _) = engine.deposit(d.user_id, 50_000, None, now).await.unwrap();
    let second = engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    assert!(second.commissions.is_empty());

    let stats = engine.referral_stats(c.user_id).await.unwrap();
    assert_eq!(stats.direct_referrals, 1);
    assert_eq!(stats.total_earned, 3_000);
    assert_eq!(stats.earned_by_level, [3_000, 0, 0]);
}

#[tokio::test]
async fn failed_first_deposit_keeps_the_commission_for_later() {
    let engine = engine();
    let now = ts(2026, 2, 1, 9);
    let a = engine.register_user("CM", None, now).await.unwrap();
    let b = engine
        .register_user("CM", Some(&a.referral_code), now)
        .await
        .unwrap();

    let (tx, _) = engine.deposit(b.user_id, 40_000, None, now).await.unwrap();
    engine
        .confirm_deposit(&tx.reference, false, now)
        .await
        .unwrap();
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 0);

    let (tx, _) = engine.deposit(b.user_id, 20_000, None, now).await.unwrap();
    let outcome = engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    assert_eq!(outcome.commissions.len(), 1);
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 600);
}

#[tokio::test]
async fn non_active_ancestor_is_skipped_not_failed() {
    let engine = engine();
    let now = ts(2026, 2, 1, 9);
    let a = engine.register_user("CM", None, now).await.unwrap();
    let b = engine
        .register_user("CM", Some(&a.referral_code), now)
        .await
        .unwrap();
    let c = engine
        .register_user("CM", Some(&b.referral_code), now)
        .await
        .unwrap();
    engine
        .set_user_status(b.user_id, UserStatus::BANNED)
        .await
        .unwrap();

    let (tx, _) = engine.deposit(c.user_id, 100_000, None, now).await.unwrap();
    let outcome = engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();

    // level 1 (banned) skipped, level 2 still paid
    assert_eq!(outcome.commissions.len(), 1);
    assert_eq!(outcome.commissions_skipped, 1);
    assert_eq!(engine.balance(b.user_id).await.unwrap(), 0);
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 2_000);
    assert_eq!(engine.balance(c.user_id).await.unwrap(), 100_000);
}

#[tokio::test]
async fn unknown_referral_code_is_rejected() {
    let engine = engine();
    let err = engine
        .register_user("CM", Some("NOPE1234"), ts(2026, 2, 1, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn weekly_commissions_pay_once_per_period() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);

    let a = engine.register_user("CM", None, now).await.unwrap();
    let b = engine
        .register_user("CM", Some(&a.referral_code), now)
        .await
        .unwrap();
    let (tx, _) = engine.deposit(b.user_id, 100_000, None, now).await.unwrap();
    engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    // a holds the 3% first-deposit commission at this point
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 3_000);

    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), now)
        .await
        .unwrap();
    let placed = engine
        .place_bet(b.user_id, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();
    assert_eq!(placed.bet.amount, 2_000);

    let cancel = AtomicBool::new(false);
    let run = engine.run_weekly_commissions(now, &cancel).await;
    assert!(run.finished);
    assert_eq!(run.payments.len(), 1);
    assert_eq!(run.payments[0].amount, 20);
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 3_020);

    // rerunning the same period is a no-op
    let rerun = engine.run_weekly_commissions(now, &cancel).await;
    assert!(rerun.finished);
    assert!(rerun.payments.is_empty());
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 3_020);
}

#[tokio::test]
async fn weekly_run_counts_skipped_ancestors() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let a = engine.register_user("CM", None, now).await.unwrap();
    let b = engine
        .register_user("CM", Some(&a.referral_code), now)
        .await
        .unwrap();
    let (tx, _) = engine.deposit(b.user_id, 100_000, None, now).await.unwrap();
    engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), now)
        .await
        .unwrap();
    engine
        .place_bet(b.user_id, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();
    engine
        .set_user_status(a.user_id, UserStatus::BANNED)
        .await
        .unwrap();

    let cancel = AtomicBool::new(false);
    let run = engine.run_weekly_commissions(now, &cancel).await;
    assert!(run.finished);
    assert!(run.payments.is_empty());
    assert_eq!(run.skipped, 1);
    assert_eq!(run.run.skipped, 1);
    // the banned ancestor keeps only the first-deposit commission
    assert_eq!(engine.balance(a.user_id).await.unwrap(), 3_000);
}

#[tokio::test]
async fn cancelled_commission_run_resumes_cleanly() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let a = engine.register_user("CM", None, now).await.unwrap();
    let b = engine
        .register_user("CM", Some(&a.referral_code), now)
        .await
        .unwrap();
    let (tx, _) = engine.deposit(b.user_id, 100_000, None, now).await.unwrap();
    engine
        .confirm_deposit(&tx.reference, true, now)
        .await
        .unwrap();
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), now)
        .await
        .unwrap();
    engine
        .place_bet(b.user_id, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();

    let cancelled = AtomicBool::new(true);
    let run = engine.run_weekly_commissions(now, &cancelled).await;
    assert!(run.cancelled);
    assert!(!run.finished);
    assert!(run.payments.is_empty());

    let cancel = AtomicBool::new(false);
    let resumed = engine.run_weekly_commissions(now, &cancel).await;
    assert!(resumed.finished);
    assert_eq!(resumed.payments.len(), 1);
}

// ---- predictions and settlement ----

#[tokio::test]
async fn stake_is_sized_from_tier_and_clamped() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);

    // 100,000 sits in the 2% / 1% tier
    let user = funded(&engine, 100_000, now).await;
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), now)
        .await
        .unwrap();
    let placed = engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();
    assert_eq!(placed.bet.amount, 2_000);
    assert_eq!(engine.balance(user).await.unwrap(), 98_000);

    // the first debit dropped the balance into the 1.5% / 0.75% tier,
    // so the second slot is 0.75% of 98,000
    let placed = engine
        .place_bet(user, prediction.id, BetSlot::SECOND, now)
        .await
        .unwrap();
    assert_eq!(placed.bet.amount, 735);
}

#[tokio::test]
async fn stake_below_minimum_is_clamped_up() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);

    // 50,000 is in the 1.5% / 0.75% tier; 0.75% = 375
    let user = funded(&engine, 50_000, now).await;
    let prediction = engine
        .create_prediction(pick(1_000, 50_000, 0, 180), now)
        .await
        .unwrap();
    let placed = engine
        .place_bet(user, prediction.id, BetSlot::SECOND, now)
        .await
        .unwrap();
    assert_eq!(placed.bet.amount, 1_000);
}

#[tokio::test]
async fn stake_above_maximum_is_clamped_down() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);

    // 600,000 is in the top tier, 3% = 18,000
    let user = funded(&engine, 600_000, now).await;
    let prediction = engine
        .create_prediction(pick(500, 5_000, 0, 180), now)
        .await
        .unwrap();
    let placed = engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();
    assert_eq!(placed.bet.amount, 5_000);
}

#[tokio::test]
async fn broke_user_cannot_cover_the_minimum_stake() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let user = engine
        .register_user("CM", None, now)
        .await
        .unwrap()
        .user_id;
    let prediction = engine
        .create_prediction(pick(500, 5_000, 0, 180), now)
        .await
        .unwrap();
    let err = engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds { .. }));
}

#[tokio::test]
async fn daily_bet_limit_is_enforced_and_refunds_free_a_slot() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let user = funded(&engine, 100_000, now).await;

    // full refund on a miss for this market
    let p1 = engine
        .create_prediction(pick(500, 50_000, 10_000, 180), now)
        .await
        .unwrap();
    let p2 = engine
        .create_prediction(pick(500, 50_000, 0, 180), now)
        .await
        .unwrap();

    engine
        .place_bet(user, p1.id, BetSlot::FIRST, now)
        .await
        .unwrap();
    engine
        .place_bet(user, p2.id, BetSlot::SECOND, now)
        .await
        .unwrap();
    let err = engine
        .place_bet(user, p2.id, BetSlot::FIRST, now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DailyBetLimitExceeded));

    // the first market misses and refunds in full, freeing the slot
    let summary = engine
        .settle_prediction(p1.id, MatchOutcome::DRAW, now)
        .await
        .unwrap();
    assert_eq!(summary.refunded, 1);
    engine
        .place_bet(user, p1.id, BetSlot::FIRST, now)
        .await
        .unwrap_err();
    engine
        .place_bet(user, p2.id, BetSlot::FIRST, now)
        .await
        .unwrap();
}

#[tokio::test]
async fn winning_bet_pays_stake_times_odds() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let user = funded(&engine, 100_000, now).await;
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 250), now)
        .await
        .unwrap();
    engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();
    assert_eq!(engine.balance(user).await.unwrap(), 98_000);

    let summary = engine
        .settle_prediction(prediction.id, MatchOutcome::HOME_WIN, now)
        .await
        .unwrap();
    assert_eq!(summary.won, 1);
    assert_eq!(summary.prediction.status, PredictionStatus::SETTLED);
    // 2,000 at 2.50
    assert_eq!(engine.balance(user).await.unwrap(), 103_000);
}

#[tokio::test]
async fn losing_bet_records_a_zero_marker_and_partial_refund() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let user = funded(&engine, 100_000, now).await;
    // 20% back on a miss
    let prediction = engine
        .create_prediction(pick(500, 50_000, 2_000, 180), now)
        .await
        .unwrap();
    engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();

    let summary = engine
        .settle_prediction(prediction.id, MatchOutcome::AWAY_WIN, now)
        .await
        .unwrap();
    assert_eq!(summary.refunded, 1);
    assert_eq!(engine.balance(user).await.unwrap(), 98_400);

    let entries = engine.ledger(user, None, None).await.unwrap();
    let marker = entries
        .iter()
        .find(|tx| tx.tx_type == TxType::BET_LOST_NOOP)
        .unwrap();
    assert_eq!(marker.amount, 0);
    assert_eq!(marker.balance_before, marker.balance_after);
    assert!(entries.iter().any(|tx| tx.tx_type == TxType::REFUND && tx.amount == 400));
}

#[tokio::test]
async fn settlement_is_idempotent() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let user = funded(&engine, 100_000, now).await;
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 250), now)
        .await
        .unwrap();
    engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();

    engine
        .settle_prediction(prediction.id, MatchOutcome::HOME_WIN, now)
        .await
        .unwrap();
    let again = engine
        .settle_prediction(prediction.id, MatchOutcome::HOME_WIN, now)
        .await
        .unwrap();
    assert_eq!(again.won, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(engine.balance(user).await.unwrap(), 103_000);

    let err = engine
        .settle_prediction(prediction.id, MatchOutcome::DRAW, now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn closed_prediction_rejects_bets_but_still_settles() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let user = funded(&engine, 100_000, now).await;
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), now)
        .await
        .unwrap();
    engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();

    engine.close_prediction(prediction.id).await.unwrap();
    let err = engine
        .place_bet(user, prediction.id, BetSlot::SECOND, now)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PredictionNotActive));

    let summary = engine
        .settle_prediction(prediction.id, MatchOutcome::HOME_WIN, now)
        .await
        .unwrap();
    assert_eq!(summary.won, 1);

    let err = engine.close_prediction(prediction.id).await.unwrap_err();
    assert!(matches!(err, EngineError::PredictionNotActive));
}

#[tokio::test]
async fn sweep_closes_markets_past_their_match_date() {
    let engine = engine();
    let now = ts(2026, 3, 10, 10);
    let user = funded(&engine, 100_000, now).await;
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), now)
        .await
        .unwrap();
    engine
        .place_bet(user, prediction.id, BetSlot::FIRST, now)
        .await
        .unwrap();

    let cancel = AtomicBool::new(false);
    // before kickoff nothing happens
    let summary = engine.settlement_sweep(now, &cancel).await;
    assert!(summary.closed.is_empty());

    let after_kickoff = ts(2026, 3, 14, 21);
    let summary = engine.settlement_sweep(after_kickoff, &cancel).await;
    assert_eq!(summary.closed.len(), 1);
    assert_eq!(summary.closed[0].status, PredictionStatus::CLOSED);

    let listed = engine.list_predictions().await;
    assert_eq!(listed[0].status, PredictionStatus::CLOSED);
}

#[tokio::test]
async fn settling_an_unknown_prediction_fails() {
    let engine = engine();
    let err = engine
        .settle_prediction(42, MatchOutcome::DRAW, ts(2026, 3, 10, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PredictionNotFound { .. }));
}

// ---- concurrency ----

#[tokio::test]
async fn concurrent_deposits_keep_the_ledger_consistent() {
    let engine = Arc::new(Engine::new(VipTable::default(), 2));
    let now = ts(2026, 2, 1, 9);
    let user = engine
        .register_user("CM", None, now)
        .await
        .unwrap()
        .user_id;

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let (tx, _) = engine
                .deposit(user, 1_000, Some(format!("load-{}", i)), now)
                .await
                .unwrap();
            engine
                .confirm_deposit(&tx.reference, true, now)
                .await
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let (eager, folded) = engine.audit_balance(user).await.unwrap();
    assert_eq!(eager, 20_000);
    assert_eq!(eager, folded);
    assert_eq!(engine.ledger(user, None, None).await.unwrap().len(), 20);
}

// ---- hydration ----

fn seeded_rows() -> (
    Vec<rows::User>,
    Vec<rows::Referral>,
    Vec<rows::DailyStreak>,
    Vec<rows::Transaction>,
    Vec<rows::Prediction>,
    Vec<rows::PredictionBet>,
) {
    let t0 = ts(2026, 1, 2, 8);
    let users = vec![
        rows::User {
            id: 1,
            country: "CM".to_string(),
            status: "ACTIVE".to_string(),
            referral_code: "AAAA1111".to_string(),
            referrer_id: None,
            created_at: t0,
        },
        rows::User {
            id: 2,
            country: "CM".to_string(),
            status: "ACTIVE".to_string(),
            referral_code: "BBBB2222".to_string(),
            referrer_id: Some(1),
            created_at: t0,
        },
    ];
    let referrals = vec![rows::Referral {
        id: 1,
        referrer_id: 1,
        referred_id: 2,
        level: 1,
        total_earned: 0,
        created_at: t0,
    }];
    let streaks = vec![rows::DailyStreak {
        id: 1,
        user_id: 1,
        last_claim_date: Some(ts(2026, 1, 4, 0).date_naive()),
        streak_count: 3,
        milestones_paid: vec![],
        updated_at: ts(2026, 1, 4, 9),
    }];
    let transactions = vec![
        rows::Transaction {
            id: "a1".to_string(),
            user_id: 1,
            tx_type: "DEPOSIT".to_string(),
            amount: 50_000,
            balance_before: 0,
            balance_after: 50_000,
            status: "COMPLETED".to_string(),
            reference: "dep:seed-1".to_string(),
            created_at: ts(2026, 1, 3, 9),
        },
        rows::Transaction {
            id: "a2".to_string(),
            user_id: 1,
            tx_type: "BET_PLACED".to_string(),
            amount: -2_000,
            balance_before: 50_000,
            balance_after: 48_000,
            status: "COMPLETED".to_string(),
            reference: "bet:3".to_string(),
            created_at: ts(2026, 1, 5, 9),
        },
        rows::Transaction {
            id: "b1".to_string(),
            user_id: 2,
            tx_type: "DEPOSIT".to_string(),
            amount: 10_000,
            balance_before: 0,
            balance_after: 0,
            status: "PENDING".to_string(),
            reference: "dep:seed-2".to_string(),
            created_at: ts(2026, 1, 5, 10),
        },
    ];
    let predictions = vec![rows::Prediction {
        id: 7,
        home_team: "Coton Sport".to_string(),
        away_team: "Colombe du Sud".to_string(),
        league: "Elite One".to_string(),
        match_date: ts(2026, 1, 10, 18),
        predicted_outcome: "HOME_WIN".to_string(),
        confidence: 4,
        odds_x100: 150,
        refund_bps: 0,
        min_bet: 500,
        max_bet: 50_000,
        status: "ACTIVE".to_string(),
        result: None,
        created_at: ts(2026, 1, 4, 9),
    }];
    let bets = vec![rows::PredictionBet {
        id: 3,
        user_id: 1,
        prediction_id: 7,
        slot: "FIRST".to_string(),
        amount: 2_000,
        odds_x100: 150,
        status: "PENDING".to_string(),
        placed_on: ts(2026, 1, 5, 0).date_naive(),
        created_at: ts(2026, 1, 5, 9),
    }];
    (users, referrals, streaks, transactions, predictions, bets)
}

#[tokio::test]
async fn hydration_restores_balances_streaks_and_id_counters() {
    let (users, referrals, streaks, transactions, predictions, bets) = seeded_rows();
    let engine = Engine::hydrate(
        &[],
        &users,
        &referrals,
        &streaks,
        &transactions,
        &predictions,
        &bets,
        &[],
        2,
    )
    .unwrap();

    let (eager, folded) = engine.audit_balance(1).await.unwrap();
    assert_eq!(eager, 48_000);
    assert_eq!(eager, folded);
    assert_eq!(engine.balance(2).await.unwrap(), 0);

    // the pending seed deposit is user 2's first; confirming it pays the
    // level-1 commission to user 1
    let outcome = engine
        .confirm_deposit("dep:seed-2", true, ts(2026, 1, 5, 11))
        .await
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.commissions.len(), 1);
    assert_eq!(engine.balance(2).await.unwrap(), 10_000);
    assert_eq!(engine.balance(1).await.unwrap(), 48_300);

    // streak continues from the restored state
    let claim = engine
        .claim_daily_reward(1, ts(2026, 1, 5, 12))
        .await
        .unwrap();
    assert_eq!(claim.streak_count, 4);
    assert_eq!(claim.reward.amount, 175);

    // id counters resume past the persisted maxima
    let registered = engine
        .register_user("CM", None, ts(2026, 1, 5, 12))
        .await
        .unwrap();
    assert_eq!(registered.user_id, 3);
    let prediction = engine
        .create_prediction(pick(500, 50_000, 0, 180), ts(2026, 1, 5, 12))
        .await
        .unwrap();
    assert_eq!(prediction.id, 8);

    // the restored pending bet settles against the stored odds
    let summary = engine
        .settle_prediction(7, MatchOutcome::HOME_WIN, ts(2026, 1, 10, 21))
        .await
        .unwrap();
    assert_eq!(summary.won, 1);
    assert_eq!(engine.balance(1).await.unwrap(), 48_475 + 3_000);

    let (eager, folded) = engine.audit_balance(1).await.unwrap();
    assert_eq!(eager, folded);
}

#[tokio::test]
async fn hydration_restores_daily_bet_counts() {
    let (users, referrals, streaks, transactions, predictions, bets) = seeded_rows();
    let engine = Engine::hydrate(
        &[],
        &users,
        &referrals,
        &streaks,
        &transactions,
        &predictions,
        &bets,
        &[],
        2,
    )
    .unwrap();

    // user 1 already has one bet on 2026-01-05; one slot left
    let same_day = ts(2026, 1, 5, 13);
    engine
        .place_bet(1, 7, BetSlot::SECOND, same_day)
        .await
        .unwrap();
    let err = engine
        .place_bet(1, 7, BetSlot::FIRST, same_day)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DailyBetLimitExceeded));
}

#[tokio::test]
async fn hydration_replays_a_claim_the_streak_row_missed() {
    // a restart between the claim's ledger inserts and the streak upsert
    // leaves the row one day behind the references
    let users = vec![rows::User {
        id: 1,
        country: "CM".to_string(),
        status: "ACTIVE".to_string(),
        referral_code: "AAAA1111".to_string(),
        referrer_id: None,
        created_at: ts(2026, 4, 1, 8),
    }];
    let streaks = vec![rows::DailyStreak {
        id: 1,
        user_id: 1,
        last_claim_date: Some(ts(2026, 4, 6, 0).date_naive()),
        streak_count: 6,
        milestones_paid: vec![],
        updated_at: ts(2026, 4, 6, 9),
    }];
    let rewards: [i64; 7] = [100, 125, 150, 175, 200, 225, 500];
    let mut balance = 0i64;
    let mut transactions = Vec::new();
    for (i, amount) in rewards.into_iter().enumerate() {
        let day = i as u32 + 1;
        transactions.push(rows::Transaction {
            id: format!("d{}", day),
            user_id: 1,
            tx_type: "DAILY_REWARD".to_string(),
            amount,
            balance_before: balance,
            balance_after: balance + amount,
            status: "COMPLETED".to_string(),
            reference: format!("daily:1:2026-04-{:02}", day),
            created_at: ts(2026, 4, day, 9),
        });
        balance += amount;
    }
    transactions.push(rows::Transaction {
        id: "m1".to_string(),
        user_id: 1,
        tx_type: "BONUS".to_string(),
        amount: 1_000,
        balance_before: balance,
        balance_after: balance + 1_000,
        status: "COMPLETED".to_string(),
        reference: "milestone:1:7".to_string(),
        created_at: ts(2026, 4, 7, 9),
    });

    let engine = Engine::hydrate(&[], &users, &[], &streaks, &transactions, &[], &[], &[], 2).unwrap();
    assert_eq!(engine.balance(1).await.unwrap(), 2_475);

    // the restored references already consumed 2026-04-07
    let err = engine
        .claim_daily_reward(1, ts(2026, 4, 7, 12))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyClaimed));
    assert_eq!(engine.balance(1).await.unwrap(), 2_475);

    // the next day continues from the replayed claim; milestone 7 stays paid
    let claim = engine
        .claim_daily_reward(1, ts(2026, 4, 8, 9))
        .await
        .unwrap();
    assert_eq!(claim.streak_count, 8);
    assert_eq!(claim.reward.amount, 275);
    assert!(claim.milestone_bonus.is_none());
    assert_eq!(claim.milestones_paid, vec![7]);
    assert_eq!(engine.balance(1).await.unwrap(), 2_750);

    let (eager, folded) = engine.audit_balance(1).await.unwrap();
    assert_eq!(eager, folded);
}

#[tokio::test]
async fn restored_milestone_reference_is_not_paid_again() {
    let users = vec![rows::User {
        id: 1,
        country: "CM".to_string(),
        status: "ACTIVE".to_string(),
        referral_code: "AAAA1111".to_string(),
        referrer_id: None,
        created_at: ts(2026, 3, 1, 8),
    }];
    // the milestone ledger entry survived a restart, the streak row
    // update that marked it paid did not
    let streaks = vec![rows::DailyStreak {
        id: 1,
        user_id: 1,
        last_claim_date: Some(ts(2026, 4, 6, 0).date_naive()),
        streak_count: 6,
        milestones_paid: vec![],
        updated_at: ts(2026, 4, 6, 9),
    }];
    let transactions = vec![rows::Transaction {
        id: "m1".to_string(),
        user_id: 1,
        tx_type: "BONUS".to_string(),
        amount: 1_000,
        balance_before: 0,
        balance_after: 1_000,
        status: "COMPLETED".to_string(),
        reference: "milestone:1:7".to_string(),
        created_at: ts(2026, 3, 7, 9),
    }];

    let engine = Engine::hydrate(&[], &users, &[], &streaks, &transactions, &[], &[], &[], 2).unwrap();
    assert_eq!(engine.balance(1).await.unwrap(), 1_000);

    // crossing 7 again pays the day but never re-appends the milestone
    let claim = engine
        .claim_daily_reward(1, ts(2026, 4, 7, 10))
        .await
        .unwrap();
    assert_eq!(claim.streak_count, 7);
    assert_eq!(claim.reward.amount, 500);
    assert!(claim.milestone_bonus.is_none());
    assert_eq!(claim.milestones_paid, vec![7]);
    assert_eq!(engine.balance(1).await.unwrap(), 1_500);
}
