use chrono::{DateTime, NaiveDate, Utc};
use common::utils::{BetSlot, BetStatus, MatchOutcome, PredictionStatus};
use serde::{Deserialize, Serialize};

use crate::constants::bps_of;
use crate::errors::EngineError;
use crate::vip::VipLevel;

/// An admin-curated pick. Odds and the refund percentage are fixed at
/// authoring time; bets snapshot the odds again at placement.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub id: i64,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub match_date: DateTime<Utc>,
    pub predicted_outcome: MatchOutcome,
    pub confidence: u8,
    pub odds_x100: u32,
    pub refund_bps: u32,
    pub min_bet: i64,
    pub max_bet: i64,
    pub status: PredictionStatus,
    pub result: Option<MatchOutcome>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPrediction {
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub match_date: DateTime<Utc>,
    pub predicted_outcome: MatchOutcome,
    pub confidence: u8,
    pub odds_x100: u32,
    pub refund_bps: u32,
    pub min_bet: i64,
    pub max_bet: i64,
}

impl NewPrediction {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.home_team.trim().is_empty()
            || self.away_team.trim().is_empty()
            || self.league.trim().is_empty()
        {
            return Err(EngineError::validation("teams and league are required"));
        }
        if !(1..=5).contains(&self.confidence) {
            return Err(EngineError::validation(format!(
                "confidence must be 1..=5, got {}",
                self.confidence
            )));
        }
        if self.odds_x100 <= 100 {
            return Err(EngineError::validation(format!(
                "odds must exceed 1.00, got {}",
                self.odds_x100
            )));
        }
        if self.refund_bps > 10_000 {
            return Err(EngineError::validation(format!(
                "refund_bps must be <= 10000, got {}",
                self.refund_bps
            )));
        }
        if self.min_bet <= 0 {
            return Err(EngineError::validation("min_bet must be positive"));
        }
        if self.max_bet < self.min_bet {
            return Err(EngineError::validation(format!(
                "max_bet {} is below min_bet {}",
                self.max_bet, self.min_bet
            )));
        }
        Ok(())
    }

    pub fn into_prediction(self, id: i64, now: DateTime<Utc>) -> Prediction {
        Prediction {
            id,
            home_team: self.home_team,
            away_team: self.away_team,
            league: self.league,
            match_date: self.match_date,
            predicted_outcome: self.predicted_outcome,
            confidence: self.confidence,
            odds_x100: self.odds_x100,
            refund_bps: self.refund_bps,
            min_bet: self.min_bet,
            max_bet: self.max_bet,
            status: PredictionStatus::ACTIVE,
            result: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Bet {
    pub id: i64,
    pub user_id: i64,
    pub prediction_id: i64,
    pub slot: BetSlot,
    pub amount: i64,
    pub odds_x100: u32,
    pub status: BetStatus,
    pub placed_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Stake sizing never trusts the client: a tier percentage of the
/// pre-debit balance, clamped into the prediction's bounds.
pub fn stake_for(
    balance: i64,
    tier: &VipLevel,
    slot: BetSlot,
    min_bet: i64,
    max_bet: i64,
) -> i64 {
    let bps = match slot {
        BetSlot::FIRST => tier.first_bet_bps,
        BetSlot::SECOND => tier.second_bet_bps,
    };
    bps_of(balance, bps).clamp(min_bet, max_bet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vip::VipTable;
    use chrono::TimeZone;

    fn new_prediction() -> NewPrediction {
        NewPrediction {
            home_team: "Canon Yaoundé".to_string(),
            away_team: "Union Douala".to_string(),
            league: "Elite One".to_string(),
            match_date: Utc.with_ymd_and_hms(2026, 8, 23, 15, 0, 0).unwrap(),
            predicted_outcome: MatchOutcome::HOME_WIN,
            confidence: 4,
            odds_x100: 185,
            refund_bps: 2_000,
            min_bet: 1_000,
            max_bet: 50_000,
        }
    }

    #[test]
    fn stake_is_a_tier_percentage_of_balance() {
        let table = VipTable::default();
        // tier 3 first slot is 2%
        let tier = table.classify(100_000);
        assert_eq!(tier.level, 3);
        assert_eq!(stake_for(100_000, tier, BetSlot::FIRST, 1_000, 50_000), 2_000);
        assert_eq!(stake_for(100_000, tier, BetSlot::SECOND, 1_000, 50_000), 1_000);
    }

    #[test]
    fn stake_clamps_into_prediction_bounds() {
        let table = VipTable::default();
        // tier 2 first slot 1.5% of 50,000 = 750, below the floor
        let tier = table.classify(50_000);
        assert_eq!(stake_for(50_000, tier, BetSlot::FIRST, 1_000, 50_000), 1_000);

        // tier 5 first slot 3% of 10,000,000 = 300,000, above the cap
        let tier = table.classify(10_000_000);
        assert_eq!(
            stake_for(10_000_000, tier, BetSlot::FIRST, 1_000, 50_000),
            50_000
        );
    }

    #[test]
    fn authoring_validation_rejects_bad_inputs() {
        let mut p = new_prediction();
        p.confidence = 6;
        assert!(p.validate().is_err());

        let mut p = new_prediction();
        p.odds_x100 = 100;
        assert!(p.validate().is_err());

        let mut p = new_prediction();
        p.refund_bps = 10_001;
        assert!(p.validate().is_err());

        let mut p = new_prediction();
        p.max_bet = 500;
        assert!(p.validate().is_err());

        let mut p = new_prediction();
        p.home_team = "  ".to_string();
        assert!(p.validate().is_err());

        assert!(new_prediction().validate().is_ok());
    }
}
