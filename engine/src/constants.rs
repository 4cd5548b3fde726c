/// Basis-point denominator; 100 bps = 1%.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Decimal odds are fixed-point hundredths (185 = 1.85).
pub const ODDS_DENOMINATOR: i64 = 100;

/// Cap on non-refunded bets per user per calendar day.
pub const DEFAULT_DAILY_BET_LIMIT: u32 = 2;

/// How long an operation waits on an account lock before it is rejected
/// as a transient conflict.
pub const LOCK_WAIT_MS: u64 = 2_000;

/// Streak rewards cycle through 30 positions, FCFA each. Positions 7, 14,
/// 21, 28 and 30 carry elevated amounts.
pub const DAILY_REWARD_TABLE: [i64; 30] = [
    100, 125, 150, 175, 200, 225, 500, // days 1-7
    275, 300, 325, 350, 375, 400, 1_000, // days 8-14
    450, 475, 500, 525, 550, 575, 1_500, // days 15-21
    625, 650, 675, 700, 725, 750, 2_000, // days 22-28
    800, 3_000, // days 29-30
];

/// One-time bonuses paid the first time a streak reaches each threshold.
pub const STREAK_MILESTONES: [(u32, i64); 4] = [(7, 1_000), (14, 2_500), (21, 5_000), (30, 10_000)];

/// First-deposit commission for ancestors at levels 1..=3.
pub const FIRST_DEPOSIT_COMMISSION_BPS: [u32; 3] = [300, 200, 100];

/// Weekly wager-volume commission for ancestors at levels 1..=2; level 3
/// never participates in this trigger.
pub const WEEKLY_COMMISSION_BPS: [u32; 2] = [100, 50];

/// Trailing window summed by the weekly commission run.
pub const WAGER_WINDOW_DAYS: i64 = 7;

/// Length of the uppercase alphanumeric referral codes.
pub const REFERRAL_CODE_LEN: usize = 8;

/// Baseline percentages for balances below the lowest VIP tier.
pub const STANDARD_DAILY_REWARD: i64 = 100;
pub const STANDARD_FIRST_BET_BPS: u32 = 50;
pub const STANDARD_SECOND_BET_BPS: u32 = 25;
pub const STANDARD_REFERRAL_BONUS_BPS: u32 = 0;

/// Floor division keeps every derived amount an exact integer; the house
/// keeps the remainder. The intermediate product is widened so extreme
/// amounts cannot wrap, and a result past the currency range saturates.
pub fn bps_of(amount: i64, bps: u32) -> i64 {
    let wide = amount as i128 * bps as i128 / BPS_DENOMINATOR as i128;
    wide.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Gross payout for a winning stake at a snapshotted decimal odds value.
pub fn win_payout(stake: i64, odds_x100: u32) -> i64 {
    let wide = stake as i128 * odds_x100 as i128 / ODDS_DENOMINATOR as i128;
    wide.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bps_math_floors() {
        assert_eq!(bps_of(100_000, 300), 3_000);
        assert_eq!(bps_of(100_000, 50), 500);
        assert_eq!(bps_of(99, 100), 0);
        assert_eq!(bps_of(10_001, 50), 50);
    }

    #[test]
    fn win_payout_uses_odds_hundredths() {
        assert_eq!(win_payout(2_000, 185), 3_700);
        assert_eq!(win_payout(1_000, 101), 1_010);
        assert_eq!(win_payout(999, 150), 1_498);
    }

    #[test]
    fn money_helpers_survive_extreme_inputs() {
        assert_eq!(bps_of(i64::MAX, 10_000), i64::MAX);
        assert_eq!(bps_of(i64::MAX, 300), 276_701_161_105_643_274);
        assert_eq!(win_payout(i64::MAX, 100), i64::MAX);
        assert_eq!(win_payout(i64::MAX, u32::MAX), i64::MAX);
    }

    #[test]
    fn reward_table_has_elevated_specials() {
        for special in [7, 14, 21, 28, 30] {
            let value = DAILY_REWARD_TABLE[special - 1];
            assert!(value > DAILY_REWARD_TABLE[special - 2], "position {}", special);
        }
        assert_eq!(DAILY_REWARD_TABLE.len(), 30);
    }
}
