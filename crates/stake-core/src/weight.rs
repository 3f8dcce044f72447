//! Coin-day weight of a staked output.

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::network::KernelParams;

/// What to do when `value * time_weight` does not fit in 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Redo the product in 128-bit arithmetic.
    #[default]
    Widen,
    /// Fail with [`KernelError::ArithmeticOverflow`].
    Reject,
}

/// Seconds of age that count toward weight.
///
/// Age is capped at `stake_max_age`; under v0.3 the minimum age is
/// subtracted, so an output exactly at the minimum age weighs nothing.
pub fn time_weight(
    params: &KernelParams,
    prev_tx_time: i64,
    tx_time: i64,
    stake_min_age: i64,
    is_protocol_v03: bool,
) -> i64 {
    let age = tx_time.saturating_sub(prev_tx_time).min(params.stake_max_age);
    if is_protocol_v03 {
        age.saturating_sub(stake_min_age)
    } else {
        age
    }
}

/// Coin-day weight: `value * time_weight / (coin * seconds_per_day)`.
///
/// Division rounds toward negative infinity, so a non-positive time weight
/// gives a zero or negative weight rather than an error.
pub fn coin_day_weight(
    params: &KernelParams,
    value: i64,
    time_weight: i64,
    policy: OverflowPolicy,
) -> Result<i64, KernelError> {
    let divisor = params.coin_day_seconds();
    if divisor <= 0 {
        return Err(KernelError::InvalidParams("coin must be positive"));
    }

    if let Some(product) = value.checked_mul(time_weight) {
        return Ok(product.div_euclid(divisor));
    }

    let overflow = KernelError::ArithmeticOverflow { value, time_weight };
    match policy {
        OverflowPolicy::Reject => Err(overflow),
        OverflowPolicy::Widen => {
            let wide = i128::from(value) * i128::from(time_weight);
            i64::try_from(wide.div_euclid(i128::from(divisor))).map_err(|_| overflow)
        }
    }
}
