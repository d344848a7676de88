use thiserror::Error;

/// Failures talking to the content or progress store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Everything a boss battle flow can fail with.
///
/// Data sparsity (empty pools, short quotas) is not an error: the assembler
/// recovers from it locally and reports the real question count.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BattleError {
    /// Tier catalog entry is malformed. Fatal, detected at module init.
    #[error("tier catalog misconfigured: {0}")]
    Catalog(String),

    #[error("unknown boss tier {0}")]
    UnknownTier(u8),

    #[error("boss {tier} is locked: {reason}")]
    Locked { tier: u8, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("learner profile not found")]
    LearnerNotFound,

    #[error("boss exam {0} is already in progress")]
    ExamInProgress(u64),

    #[error("no boss exam in progress")]
    NoActiveExam,

    #[error("invalid question: {0}")]
    InvalidQuestion(String),
}

pub type BattleResult<T> = Result<T, BattleError>;
