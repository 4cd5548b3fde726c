use serde::{Deserialize, Serialize};

use crate::constants::{
    STANDARD_DAILY_REWARD, STANDARD_FIRST_BET_BPS, STANDARD_REFERRAL_BONUS_BPS,
    STANDARD_SECOND_BET_BPS,
};
use crate::errors::EngineError;

/// One tier row. Ranges are inclusive; `max_balance` is None only on the
/// top tier. Percentages are basis points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VipLevel {
    pub level: u8,
    pub min_balance: i64,
    pub max_balance: Option<i64>,
    pub daily_reward: i64,
    pub first_bet_bps: u32,
    pub second_bet_bps: u32,
    pub referral_bonus_bps: u32,
}

/// Contiguous, non-overlapping tier ranges plus the synthesized Standard
/// tier for balances below the lowest `min_balance`. Reference data: built
/// once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct VipTable {
    standard: VipLevel,
    levels: Vec<VipLevel>,
}

impl VipTable {
    /// Validates contiguity before accepting override rows from storage.
    pub fn new(levels: Vec<VipLevel>) -> Result<Self, EngineError> {
        if levels.is_empty() {
            return Err(EngineError::validation("vip table must not be empty"));
        }
        for (idx, level) in levels.iter().enumerate() {
            if level.level as usize != idx + 1 {
                return Err(EngineError::validation(format!(
                    "vip levels must be numbered 1..={}, got {} at position {}",
                    levels.len(),
                    level.level,
                    idx + 1
                )));
            }
            if level.min_balance < 0 {
                return Err(EngineError::validation("vip min_balance must be >= 0"));
            }
            match (level.max_balance, levels.get(idx + 1)) {
                (Some(max), Some(next)) if next.min_balance == max + 1 => {}
                (Some(max), Some(next)) => {
                    return Err(EngineError::validation(format!(
                        "vip ranges must be contiguous: level {} ends at {}, level {} starts at {}",
                        level.level, max, next.level, next.min_balance
                    )));
                }
                (Some(_), None) => {
                    return Err(EngineError::validation("the top vip tier must be unbounded"));
                }
                (None, Some(_)) => {
                    return Err(EngineError::validation(
                        "only the top vip tier may be unbounded",
                    ));
                }
                (None, None) => {}
            }
        }

        let standard = VipLevel {
            level: 0,
            min_balance: 0,
            max_balance: Some(levels[0].min_balance.saturating_sub(1)),
            daily_reward: STANDARD_DAILY_REWARD,
            first_bet_bps: STANDARD_FIRST_BET_BPS,
            second_bet_bps: STANDARD_SECOND_BET_BPS,
            referral_bonus_bps: STANDARD_REFERRAL_BONUS_BPS,
        };
        Ok(VipTable { standard, levels })
    }

    /// Pure classification: a balance below the lowest tier maps to
    /// Standard. Recomputed on every read, never cached.
    pub fn classify(&self, balance: i64) -> &VipLevel {
        for level in &self.levels {
            if balance >= level.min_balance
                && level.max_balance.map_or(true, |max| balance <= max)
            {
                return level;
            }
        }
        &self.standard
    }

    pub fn standard(&self) -> &VipLevel {
        &self.standard
    }

    /// Standard first, then tiers 1..=n.
    pub fn all(&self) -> Vec<VipLevel> {
        let mut out = Vec::with_capacity(self.levels.len() + 1);
        out.push(self.standard.clone());
        out.extend(self.levels.iter().cloned());
        out
    }
}

impl Default for VipTable {
    fn default() -> Self {
        VipTable {
            standard: VipLevel {
                level: 0,
                min_balance: 0,
                max_balance: Some(9_999),
                daily_reward: STANDARD_DAILY_REWARD,
                first_bet_bps: STANDARD_FIRST_BET_BPS,
                second_bet_bps: STANDARD_SECOND_BET_BPS,
                referral_bonus_bps: STANDARD_REFERRAL_BONUS_BPS,
            },
            levels: vec![
                VipLevel {
                    level: 1,
                    min_balance: 10_000,
                    max_balance: Some(49_999),
                    daily_reward: 200,
                    first_bet_bps: 100,
                    second_bet_bps: 50,
                    referral_bonus_bps: 50,
                },
                VipLevel {
                    level: 2,
                    min_balance: 50_000,
                    max_balance: Some(99_999),
                    daily_reward: 300,
                    first_bet_bps: 150,
                    second_bet_bps: 75,
                    referral_bonus_bps: 75,
                },
                VipLevel {
                    level: 3,
                    min_balance: 100_000,
                    max_balance: Some(249_999),
                    daily_reward: 500,
                    first_bet_bps: 200,
                    second_bet_bps: 100,
                    referral_bonus_bps: 100,
                },
                VipLevel {
                    level: 4,
                    min_balance: 250_000,
                    max_balance: Some(499_999),
                    daily_reward: 750,
                    first_bet_bps: 250,
                    second_bet_bps: 125,
                    referral_bonus_bps: 150,
                },
                VipLevel {
                    level: 5,
                    min_balance: 500_000,
                    max_balance: None,
                    daily_reward: 1_000,
                    first_bet_bps: 300,
                    second_bet_bps: 150,
                    referral_bonus_bps: 200,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_passes_validation() {
        let table = VipTable::default();
        assert!(VipTable::new(table.levels.clone()).is_ok());
    }

    #[test]
    fn classification_covers_boundaries() {
        let table = VipTable::default();
        assert_eq!(table.classify(0).level, 0);
        assert_eq!(table.classify(9_999).level, 0);
        assert_eq!(table.classify(10_000).level, 1);
        assert_eq!(table.classify(49_999).level, 1);
        assert_eq!(table.classify(50_000).level, 2);
        assert_eq!(table.classify(100_000).level, 3);
        assert_eq!(table.classify(249_999).level, 3);
        assert_eq!(table.classify(500_000).level, 5);
        assert_eq!(table.classify(10_000_000).level, 5);
    }

    #[test]
    fn gaps_and_overlaps_are_rejected() {
        let mut levels = VipTable::default().levels;
        levels[1].min_balance = 60_000; // gap after level 1
        assert!(matches!(
            VipTable::new(levels),
            Err(EngineError::Validation { .. })
        ));

        let mut levels = VipTable::default().levels;
        levels[0].max_balance = Some(55_000); // overlaps level 2
        assert!(matches!(
            VipTable::new(levels),
            Err(EngineError::Validation { .. })
        ));

        let mut levels = VipTable::default().levels;
        levels[2].max_balance = None; // unbounded before the top
        assert!(matches!(
            VipTable::new(levels),
            Err(EngineError::Validation { .. })
        ));
    }

    #[test]
    fn misnumbered_levels_are_rejected() {
        let mut levels = VipTable::default().levels;
        levels[3].level = 7;
        assert!(matches!(
            VipTable::new(levels),
            Err(EngineError::Validation { .. })
        ));
    }
}
