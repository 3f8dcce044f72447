//! Error types for kernel checking and unspent output lookups.

use thiserror::Error;

/// Errors raised while checking or searching stake kernels.
///
/// `TimestampViolation` and `MinAgeViolation` describe an ineligible
/// candidate rather than a fault; callers usually report them differently
/// from a plain rejected kernel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelError {
    /// The candidate time precedes the staked output's own time.
    #[error("timestamp violation: tx time {tx_time} precedes output time {prev_tx_time}")]
    TimestampViolation { tx_time: i64, prev_tx_time: i64 },

    /// The staked output has not reached the minimum stake age.
    #[error(
        "min age violation: block time {block_from_time} + min age {stake_min_age} > tx time {tx_time}"
    )]
    MinAgeViolation {
        block_from_time: i64,
        stake_min_age: i64,
        tx_time: i64,
    },

    /// The coin-day weight product does not fit the native width.
    #[error("coin-day weight overflow: value {value} * time weight {time_weight}")]
    ArithmeticOverflow { value: i64, time_weight: i64 },

    /// The compact target cannot be decoded without losing bits or sign.
    #[error("malformed compact target {0:#010x}")]
    MalformedCompactTarget(u32),

    /// The difficulty is not a positive finite number.
    #[error("invalid difficulty {0}")]
    InvalidDifficulty(f64),

    /// Kernel parameters cannot be used for weighting.
    #[error("invalid kernel parameters: {0}")]
    InvalidParams(&'static str),

    /// The search window ends before it starts, or has more than
    /// `u64::MAX` seconds.
    #[error("invalid search window [{from}, {to}]")]
    InvalidWindow { from: i64, to: i64 },
}

impl KernelError {
    /// Whether this error rejects the candidate itself (as opposed to a
    /// configuration or arithmetic fault).
    pub fn is_candidate_violation(&self) -> bool {
        matches!(
            self,
            KernelError::TimestampViolation { .. } | KernelError::MinAgeViolation { .. }
        )
    }
}

/// Errors raised by unspent output store lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backing store failed.
    #[error("store i/o: {0}")]
    Io(String),

    /// A stored record has an unexpected layout.
    #[error("corrupt {what} record: {reason}")]
    Corrupt { what: &'static str, reason: String },
}

#[cfg(feature = "sled")]
impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
