use chrono::NaiveDate;
use sqlx::{Pool, Postgres};

use crate::models::{
    CommissionRun, DailyStreak, Prediction, PredictionBet, Referral, Transaction, User, VipLevel,
};

pub async fn establish_connection(database_url: &str) -> Pool<Postgres> {
    Pool::<Postgres>::connect(database_url)
        .await
        .expect("Failed to create pool")
}

/// The api owns the schema. Statements are IF NOT EXISTS so restarts are safe.
pub async fn ensure_schema(pool: &Pool<Postgres>) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id BIGINT PRIMARY KEY,
            country TEXT NOT NULL,
            status TEXT NOT NULL,
            referral_code TEXT NOT NULL UNIQUE,
            referrer_id BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&mut *conn)
    .await?;

    // seq keeps the global append order; id is the uuid the engine minted
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS transactions (
            seq BIGSERIAL PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            user_id BIGINT NOT NULL,
            tx_type TEXT NOT NULL,
            amount BIGINT NOT NULL,
            balance_before BIGINT NOT NULL,
            balance_after BIGINT NOT NULL,
            status TEXT NOT NULL,
            reference TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (user_id, reference)
        )",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS referrals (
            id BIGSERIAL PRIMARY KEY,
            referrer_id BIGINT NOT NULL,
            referred_id BIGINT NOT NULL,
            level SMALLINT NOT NULL,
            total_earned BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (referred_id, level)
        )",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS daily_streaks (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL UNIQUE,
            last_claim_date DATE,
            streak_count INT NOT NULL DEFAULT 0,
            milestones_paid INT[] NOT NULL DEFAULT '{}',
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS predictions (
            id BIGINT PRIMARY KEY,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            league TEXT NOT NULL,
            match_date TIMESTAMPTZ NOT NULL,
            predicted_outcome TEXT NOT NULL,
            confidence SMALLINT NOT NULL,
            odds_x100 INT NOT NULL,
            refund_bps INT NOT NULL,
            min_bet BIGINT NOT NULL,
            max_bet BIGINT NOT NULL,
            status TEXT NOT NULL,
            result TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS prediction_bets (
            id BIGINT PRIMARY KEY,
            user_id BIGINT NOT NULL,
            prediction_id BIGINT NOT NULL,
            slot TEXT NOT NULL,
            amount BIGINT NOT NULL,
            odds_x100 INT NOT NULL,
            status TEXT NOT NULL,
            placed_on DATE NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS vip_levels (
            level SMALLINT PRIMARY KEY,
            min_balance BIGINT NOT NULL,
            max_balance BIGINT,
            daily_reward BIGINT NOT NULL,
            first_bet_bps INT NOT NULL,
            second_bet_bps INT NOT NULL,
            referral_bonus_bps INT NOT NULL
        )",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS commission_runs (
            period TEXT PRIMARY KEY,
            last_processed_user BIGINT,
            processed INT NOT NULL DEFAULT 0,
            failed INT NOT NULL DEFAULT 0,
            skipped INT NOT NULL DEFAULT 0,
            finished BOOLEAN NOT NULL DEFAULT FALSE,
            started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn insert_user(
    pool: &Pool<Postgres>,
    id: i64,
    country: &str,
    status: &str,
    referral_code: &str,
    referrer_id: Option<i64>,
) -> anyhow::Result<User> {
    let mut conn = pool.acquire().await?;

    let user: User = sqlx::query_as(
        "INSERT INTO users (id, country, status, referral_code, referrer_id)
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(id)
    .bind(country)
    .bind(status)
    .bind(referral_code)
    .bind(referrer_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(user)
}

pub async fn update_user_status(
    pool: &Pool<Postgres>,
    user_id: i64,
    status: &str,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query("UPDATE users SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn load_users(pool: &Pool<Postgres>) -> anyhow::Result<Vec<User>> {
    let mut conn = pool.acquire().await?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(users)
}

pub async fn insert_transaction(pool: &Pool<Postgres>, tx: &Transaction) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "INSERT INTO transactions (id, user_id, tx_type, amount, balance_before, balance_after, status, reference, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(&tx.id)
    .bind(tx.user_id)
    .bind(&tx.tx_type)
    .bind(tx.amount)
    .bind(tx.balance_before)
    .bind(tx.balance_after)
    .bind(&tx.status)
    .bind(&tx.reference)
    .bind(tx.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update_transaction(
    pool: &Pool<Postgres>,
    tx_id: &str,
    status: &str,
    balance_before: i64,
    balance_after: i64,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "UPDATE transactions SET status = $1, balance_before = $2, balance_after = $3 WHERE id = $4",
    )
    .bind(status)
    .bind(balance_before)
    .bind(balance_after)
    .bind(tx_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_transactions(pool: &Pool<Postgres>) -> anyhow::Result<Vec<Transaction>> {
    let mut conn = pool.acquire().await?;

    let txs: Vec<Transaction> = sqlx::query_as("SELECT * FROM transactions ORDER BY seq")
        .fetch_all(&mut *conn)
        .await?;

    Ok(txs)
}

pub async fn insert_referral(
    pool: &Pool<Postgres>,
    referrer_id: i64,
    referred_id: i64,
    level: i16,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "INSERT INTO referrals (referrer_id, referred_id, level)
         VALUES ($1, $2, $3) ON CONFLICT (referred_id, level) DO NOTHING",
    )
    .bind(referrer_id)
    .bind(referred_id)
    .bind(level)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn add_referral_earnings(
    pool: &Pool<Postgres>,
    referrer_id: i64,
    referred_id: i64,
    amount: i64,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "UPDATE referrals SET total_earned = total_earned + $1
         WHERE referrer_id = $2 AND referred_id = $3",
    )
    .bind(amount)
    .bind(referrer_id)
    .bind(referred_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_referrals(pool: &Pool<Postgres>) -> anyhow::Result<Vec<Referral>> {
    let mut conn = pool.acquire().await?;

    let referrals: Vec<Referral> = sqlx::query_as("SELECT * FROM referrals ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(referrals)
}

pub async fn upsert_daily_streak(
    pool: &Pool<Postgres>,
    user_id: i64,
    last_claim_date: Option<NaiveDate>,
    streak_count: i32,
    milestones_paid: &[i32],
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "INSERT INTO daily_streaks (user_id, last_claim_date, streak_count, milestones_paid)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (user_id) DO UPDATE
         SET last_claim_date = $2, streak_count = $3, milestones_paid = $4, updated_at = NOW()",
    )
    .bind(user_id)
    .bind(last_claim_date)
    .bind(streak_count)
    .bind(milestones_paid)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_daily_streaks(pool: &Pool<Postgres>) -> anyhow::Result<Vec<DailyStreak>> {
    let mut conn = pool.acquire().await?;

    let streaks: Vec<DailyStreak> = sqlx::query_as("SELECT * FROM daily_streaks ORDER BY user_id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(streaks)
}

pub async fn insert_prediction(pool: &Pool<Postgres>, p: &Prediction) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "INSERT INTO predictions (id, home_team, away_team, league, match_date, predicted_outcome, confidence, odds_x100, refund_bps, min_bet, max_bet, status, result, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(p.id)
    .bind(&p.home_team)
    .bind(&p.away_team)
    .bind(&p.league)
    .bind(p.match_date)
    .bind(&p.predicted_outcome)
    .bind(p.confidence)
    .bind(p.odds_x100)
    .bind(p.refund_bps)
    .bind(p.min_bet)
    .bind(p.max_bet)
    .bind(&p.status)
    .bind(&p.result)
    .bind(p.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update_prediction(
    pool: &Pool<Postgres>,
    prediction_id: i64,
    status: &str,
    result: Option<&str>,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query("UPDATE predictions SET status = $1, result = $2 WHERE id = $3")
        .bind(status)
        .bind(result)
        .bind(prediction_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn load_predictions(pool: &Pool<Postgres>) -> anyhow::Result<Vec<Prediction>> {
    let mut conn = pool.acquire().await?;

    let predictions: Vec<Prediction> = sqlx::query_as("SELECT * FROM predictions ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(predictions)
}

pub async fn insert_bet(pool: &Pool<Postgres>, bet: &PredictionBet) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "INSERT INTO prediction_bets (id, user_id, prediction_id, slot, amount, odds_x100, status, placed_on, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(bet.id)
    .bind(bet.user_id)
    .bind(bet.prediction_id)
    .bind(&bet.slot)
    .bind(bet.amount)
    .bind(bet.odds_x100)
    .bind(&bet.status)
    .bind(bet.placed_on)
    .bind(bet.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update_bet_status(
    pool: &Pool<Postgres>,
    bet_id: i64,
    status: &str,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query("UPDATE prediction_bets SET status = $1 WHERE id = $2")
        .bind(status)
        .bind(bet_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn load_bets(pool: &Pool<Postgres>) -> anyhow::Result<Vec<PredictionBet>> {
    let mut conn = pool.acquire().await?;

    let bets: Vec<PredictionBet> = sqlx::query_as("SELECT * FROM prediction_bets ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    Ok(bets)
}

pub async fn seed_vip_levels(pool: &Pool<Postgres>, levels: &[VipLevel]) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    for level in levels {
        sqlx::query(
            "INSERT INTO vip_levels (level, min_balance, max_balance, daily_reward, first_bet_bps, second_bet_bps, referral_bonus_bps)
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (level) DO NOTHING",
        )
        .bind(level.level)
        .bind(level.min_balance)
        .bind(level.max_balance)
        .bind(level.daily_reward)
        .bind(level.first_bet_bps)
        .bind(level.second_bet_bps)
        .bind(level.referral_bonus_bps)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn load_vip_levels(pool: &Pool<Postgres>) -> anyhow::Result<Vec<VipLevel>> {
    let mut conn = pool.acquire().await?;

    let levels: Vec<VipLevel> = sqlx::query_as("SELECT * FROM vip_levels ORDER BY level")
        .fetch_all(&mut *conn)
        .await?;

    Ok(levels)
}

pub async fn upsert_commission_run(
    pool: &Pool<Postgres>,
    run: &CommissionRun,
) -> anyhow::Result<()> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        "INSERT INTO commission_runs (period, last_processed_user, processed, failed, skipped, finished, started_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (period) DO UPDATE
         SET last_processed_user = $2, processed = $3, failed = $4, skipped = $5, finished = $6, updated_at = NOW()",
    )
    .bind(&run.period)
    .bind(run.last_processed_user)
    .bind(run.processed)
    .bind(run.failed)
    .bind(run.skipped)
    .bind(run.finished)
    .bind(run.started_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn load_commission_runs(pool: &Pool<Postgres>) -> anyhow::Result<Vec<CommissionRun>> {
    let mut conn = pool.acquire().await?;

    let runs: Vec<CommissionRun> = sqlx::query_as("SELECT * FROM commission_runs ORDER BY period")
        .fetch_all(&mut *conn)
        .await?;

    Ok(runs)
}
