pub mod constants;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod predictions;
pub mod referrals;
pub mod rewards;
pub mod vip;

#[cfg(test)]
mod engine_tests;
