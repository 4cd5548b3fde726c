use thiserror::Error;

/// Domain failures surfaced by the engine. `DuplicateReference` and
/// `ConcurrencyConflict` are recoverable (replay the prior result, retry
/// later); the rest are terminal rejections with no ledger mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    #[error("insufficient funds (balance={balance}, requested={requested})")]
    InsufficientFunds { balance: i64, requested: i64 },
    #[error("daily reward already claimed today")]
    AlreadyClaimed,
    #[error("referral chain would form a cycle")]
    CyclicReferral,
    #[error("prediction is not open for this operation")]
    PredictionNotActive,
    #[error("daily bet limit reached")]
    DailyBetLimitExceeded,
    #[error("reference already applied: {reference}")]
    DuplicateReference { reference: String },
    #[error("user not found: {user_id}")]
    UserNotFound { user_id: i64 },
    #[error("prediction not found: {prediction_id}")]
    PredictionNotFound { prediction_id: i64 },
    #[error("account is suspended or banned")]
    AccountNotActive,
    #[error("timed out waiting for the account lock")]
    ConcurrencyConflict,
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation {
            reason: reason.into(),
        }
    }
}
