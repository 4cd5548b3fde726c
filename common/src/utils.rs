#![allow(non_camel_case_types)]

use serde::{Deserialize, Serialize};

use crate::{impl_from_str_for_enum, impl_to_string_for_enum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    FCFA,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    DEPOSIT,
    WITHDRAWAL,
    BET_PLACED,
    BET_WON,
    BET_LOST_NOOP,
    REFUND,
    BONUS,
    REFERRAL_COMMISSION,
    DAILY_REWARD,
}

impl TxType {
    /// Debit types reduce the balance; everything else credits (or, for
    /// BET_LOST_NOOP, records a zero-amount marker).
    pub fn is_debit(&self) -> bool {
        matches!(self, TxType::WITHDRAWAL | TxType::BET_PLACED)
    }

    pub fn is_zero_amount(&self) -> bool {
        matches!(self, TxType::BET_LOST_NOOP)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    PENDING,
    COMPLETED,
    FAILED,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    ACTIVE,
    SUSPENDED,
    BANNED,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionStatus {
    ACTIVE,
    CLOSED,
    SETTLED,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    HOME_WIN,
    DRAW,
    AWAY_WIN,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetSlot {
    FIRST,
    SECOND,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    PENDING,
    WON,
    LOST,
    REFUNDED,
}

impl_from_str_for_enum!(Currency, FCFA);
impl_to_string_for_enum!(Currency, FCFA);
impl_from_str_for_enum!(
    TxType,
    DEPOSIT,
    WITHDRAWAL,
    BET_PLACED,
    BET_WON,
    BET_LOST_NOOP,
    REFUND,
    BONUS,
    REFERRAL_COMMISSION,
    DAILY_REWARD
);
impl_to_string_for_enum!(
    TxType,
    DEPOSIT,
    WITHDRAWAL,
    BET_PLACED,
    BET_WON,
    BET_LOST_NOOP,
    REFUND,
    BONUS,
    REFERRAL_COMMISSION,
    DAILY_REWARD
);
impl_from_str_for_enum!(TxStatus, PENDING, COMPLETED, FAILED);
impl_to_string_for_enum!(TxStatus, PENDING, COMPLETED, FAILED);
impl_from_str_for_enum!(UserStatus, ACTIVE, SUSPENDED, BANNED);
impl_to_string_for_enum!(UserStatus, ACTIVE, SUSPENDED, BANNED);
impl_from_str_for_enum!(PredictionStatus, ACTIVE, CLOSED, SETTLED);
impl_to_string_for_enum!(PredictionStatus, ACTIVE, CLOSED, SETTLED);
impl_from_str_for_enum!(MatchOutcome, HOME_WIN, DRAW, AWAY_WIN);
impl_to_string_for_enum!(MatchOutcome, HOME_WIN, DRAW, AWAY_WIN);
impl_from_str_for_enum!(BetSlot, FIRST, SECOND);
impl_to_string_for_enum!(BetSlot, FIRST, SECOND);
impl_from_str_for_enum!(BetStatus, PENDING, WON, LOST, REFUNDED);
impl_to_string_for_enum!(BetStatus, PENDING, WON, LOST, REFUNDED);
