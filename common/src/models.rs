use chrono;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub country: String,
    pub status: String,
    pub referral_code: String,
    pub referrer_id: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: String, // uuid, minted in memory before the row exists
    pub user_id: i64,
    pub tx_type: String,
    pub amount: i64, // FCFA, no sub-unit
    pub balance_before: i64,
    pub balance_after: i64,
    pub status: String,
    pub reference: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub level: i16,
    pub total_earned: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct DailyStreak {
    pub id: i64,
    pub user_id: i64,
    pub last_claim_date: Option<chrono::NaiveDate>,
    pub streak_count: i32,
    pub milestones_paid: Vec<i32>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Prediction {
    pub id: i64,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub match_date: chrono::DateTime<chrono::Utc>,
    pub predicted_outcome: String,
    pub confidence: i16,
    pub odds_x100: i32,
    pub refund_bps: i32,
    pub min_bet: i64,
    pub max_bet: i64,
    pub status: String,
    pub result: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct PredictionBet {
    pub id: i64,
    pub user_id: i64,
    pub prediction_id: i64,
    pub slot: String,
    pub amount: i64,
    pub odds_x100: i32,
    pub status: String,
    pub placed_on: chrono::NaiveDate,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct VipLevel {
    pub level: i16,
    pub min_balance: i64,
    pub max_balance: Option<i64>, // NULL on the top tier
    pub daily_reward: i64,
    pub first_bet_bps: i32,
    pub second_bet_bps: i32,
    pub referral_bonus_bps: i32,
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct CommissionRun {
    pub period: String,
    pub last_processed_user: Option<i64>,
    pub processed: i32,
    pub failed: i32,
    pub skipped: i32,
    pub finished: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
