//! Stake kernel template, serialization and hash check.

use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::compact::CompactTarget;
use crate::error::KernelError;
use crate::hash::{double_sha256, reverse_bytes};
use crate::network::{KernelParams, Network};
use crate::weight::{coin_day_weight, time_weight, OverflowPolicy};

/// Largest serialized kernel (v0.3: 8-byte modifier + five 32-bit fields).
pub const MAX_KERNEL_SIZE: usize = 28;

/// How the double-SHA256 digest is read as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashOrder {
    /// Digest bytes read as a big-endian integer.
    #[default]
    Direct,
    /// Digest bytes reversed before the big-endian read. Matches datasets
    /// produced by the historical byte-reversing checker.
    Reversed,
}

/// Inputs to one kernel check.
///
/// Field names serialize in PascalCase (`"BlockFromTime"`, `"Bits"`, ...)
/// so stored templates from earlier tooling load unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KernelTemplate {
    /// Target per coin-day in compact form.
    pub bits: CompactTarget,
    /// Time of the block containing the staked output.
    pub block_from_time: i64,
    /// Candidate coinstake time.
    pub tx_time: i64,
    /// Stake modifier in force for the output's block.
    pub stake_modifier: u64,
    /// Offset of the output's transaction inside its block.
    pub prev_tx_offset: u32,
    /// Time of the output's transaction.
    pub prev_tx_time: i64,
    /// Output index inside its transaction.
    pub prev_tx_out_index: u32,
    /// Output value in smallest units.
    pub prev_tx_out_value: i64,
    /// Serialize the stake modifier (v0.3) instead of `bits` (v0.2).
    pub is_protocol_v03: bool,
    /// Minimum output age in seconds.
    pub stake_min_age: i64,
}

impl KernelTemplate {
    /// Copy of this template at another candidate time.
    pub fn at_time(&self, tx_time: i64) -> Self {
        KernelTemplate {
            tx_time,
            ..self.clone()
        }
    }

    /// Serialize the hashed kernel into `buf`, returning its length.
    ///
    /// Layout, little-endian: `stake_modifier` (v0.3) or `bits` (v0.2),
    /// then `block_from_time`, `prev_tx_offset`, `prev_tx_time`,
    /// `prev_tx_out_index`, `tx_time`, each truncated to 32 bits.
    pub fn serialize_into(&self, buf: &mut [u8; MAX_KERNEL_SIZE]) -> usize {
        let mut pos = if self.is_protocol_v03 {
            buf[0..8].copy_from_slice(&self.stake_modifier.to_le_bytes());
            8
        } else {
            buf[0..4].copy_from_slice(&self.bits.bits().to_le_bytes());
            4
        };

        let fields = [
            self.block_from_time as u32,
            self.prev_tx_offset,
            self.prev_tx_time as u32,
            self.prev_tx_out_index,
            self.tx_time as u32,
        ];
        for field in fields {
            buf[pos..pos + 4].copy_from_slice(&field.to_le_bytes());
            pos += 4;
        }
        pos
    }

    fn check_eligibility(&self) -> Result<(), KernelError> {
        if self.tx_time < self.prev_tx_time {
            return Err(KernelError::TimestampViolation {
                tx_time: self.tx_time,
                prev_tx_time: self.prev_tx_time,
            });
        }
        if self.block_from_time.saturating_add(self.stake_min_age) > self.tx_time {
            return Err(KernelError::MinAgeViolation {
                block_from_time: self.block_from_time,
                stake_min_age: self.stake_min_age,
                tx_time: self.tx_time,
            });
        }
        Ok(())
    }
}

/// Outcome of one kernel check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelCheck {
    /// Whether `hash <= coin_day_weight * target`.
    pub accepted: bool,
    /// Kernel hash in the byte order it was compared in (big-endian).
    pub kernel_hash: [u8; 32],
    /// Coin-day weight the target was scaled by.
    pub coin_day_weight: i64,
    /// Largest per-coin-day target below which this exact kernel would
    /// have failed: `hash / coin_day_weight - 1`. Only set for accepted
    /// kernels with positive weight.
    pub min_target: Option<BigUint>,
}

impl KernelCheck {
    /// Kernel hash as an integer.
    pub fn hash_int(&self) -> BigUint {
        BigUint::from_bytes_be(&self.kernel_hash)
    }

    /// Highest difficulty this kernel would still be accepted at.
    pub fn max_difficulty(&self) -> Option<f64> {
        self.min_target
            .as_ref()
            .map(|t| CompactTarget::from_target(t).increment().to_difficulty())
    }
}

/// Checks stake kernels against a parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelValidator {
    params: KernelParams,
    hash_order: HashOrder,
    overflow: OverflowPolicy,
    strict_targets: bool,
}

impl KernelValidator {
    /// Validator with direct hash order, widening overflow and lenient
    /// compact decoding.
    pub fn new(params: KernelParams) -> Self {
        KernelValidator {
            params,
            hash_order: HashOrder::Direct,
            overflow: OverflowPolicy::Widen,
            strict_targets: false,
        }
    }

    /// Validator for a network's default parameters.
    pub fn for_network(network: Network) -> Self {
        Self::new(network.params())
    }

    pub fn with_hash_order(mut self, order: HashOrder) -> Self {
        self.hash_order = order;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// Reject compact targets that are negative or lose mantissa bits.
    pub fn with_strict_targets(mut self, strict: bool) -> Self {
        self.strict_targets = strict;
        self
    }

    pub fn params(&self) -> &KernelParams {
        &self.params
    }

    pub fn hash_order(&self) -> HashOrder {
        self.hash_order
    }

    /// Check a template.
    ///
    /// Fails only when the candidate is ineligible (time or min age), the
    /// weight overflows under [`OverflowPolicy::Reject`], or strict target
    /// decoding rejects `bits`. A kernel that misses its target is an
    /// `Ok` result with `accepted == false`.
    pub fn check(&self, template: &KernelTemplate) -> Result<KernelCheck, KernelError> {
        template.check_eligibility()?;

        let target = if self.strict_targets {
            BigInt::from(template.bits.decode_strict()?)
        } else {
            template.bits.decode()
        };

        let weight_secs = time_weight(
            &self.params,
            template.prev_tx_time,
            template.tx_time,
            template.stake_min_age,
            template.is_protocol_v03,
        );
        let weight = coin_day_weight(
            &self.params,
            template.prev_tx_out_value,
            weight_secs,
            self.overflow,
        )?;

        let mut buf = [0u8; MAX_KERNEL_SIZE];
        let len = template.serialize_into(&mut buf);
        let digest = double_sha256(&buf[..len]);
        let kernel_hash = match self.hash_order {
            HashOrder::Direct => digest,
            HashOrder::Reversed => reverse_bytes(&digest),
        };

        let hash_int = BigUint::from_bytes_be(&kernel_hash);
        let accepted = BigInt::from(hash_int.clone()) <= BigInt::from(weight) * target;

        let min_target = if accepted && weight > 0 {
            let quotient = hash_int / BigUint::from(weight as u64);
            if quotient.is_zero() {
                None
            } else {
                Some(quotient - 1u32)
            }
        } else {
            None
        };

        Ok(KernelCheck {
            accepted,
            kernel_hash,
            coin_day_weight: weight,
            min_target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_TEMPLATE: &str = r#"{
        "BlockFromTime": 1404111258,
        "StakeModifier": 11119442999521180503,
        "PrevTxOffset": 81,
        "PrevTxTime": 1404111247,
        "PrevTxOutIndex": 0,
        "PrevTxOutValue": 300000000,
        "IsProtocolV03": true,
        "StakeMinAge": 2592000,
        "Bits": 471063663,
        "TxTime": 1411662109
    }"#;

    const KNOWN_HASH: &str = "000002f826df56df766a16ab4fa83e5f06f28bed736fa56925b8c5dd71121239";

    // Accepted only when the digest is read byte-reversed.
    const REVERSED_TEMPLATE: &str = r#"{
        "BlockFromTime": 1394219584,
        "StakeModifier": 15161125480764745506,
        "PrevTxOffset": 160,
        "PrevTxTime": 1394219584,
        "PrevTxOutIndex": 1,
        "PrevTxOutValue": 210090000,
        "IsProtocolV03": true,
        "StakeMinAge": 2592000,
        "Bits": 471087779,
        "TxTime": 1411634680
    }"#;

    const REVERSED_HASH: &str = "000000db3330881519a4f32b9091b0930f24ec6fb0900acfbfb0c226c7bc3192";

    fn template(json: &str) -> KernelTemplate {
        serde_json::from_str(json).unwrap()
    }

    fn validator() -> KernelValidator {
        KernelValidator::for_network(Network::Mainnet)
    }

    #[test]
    fn test_known_vector_accepted() {
        let check = validator().check(&template(KNOWN_TEMPLATE)).unwrap();
        assert!(check.accepted);
        assert_eq!(hex::encode(check.kernel_hash), KNOWN_HASH);
        assert_eq!(check.coin_day_weight, 17_218);
        assert!(check.min_target.is_some());
    }

    #[test]
    fn test_min_target_is_tight() {
        let v = validator();
        let mut tpl = template(KNOWN_TEMPLATE);
        let min_target = v.check(&tpl).unwrap().min_target.unwrap();

        // One compact step above the minimal target still passes.
        tpl.bits = CompactTarget::from_target(&min_target).increment();
        assert_eq!(tpl.bits, CompactTarget(0x1c0b4d54));
        assert!(v.check(&tpl).unwrap().accepted);

        // The truncated minimal target itself is too small.
        tpl.bits = CompactTarget::from_target(&min_target);
        assert!(!v.check(&tpl).unwrap().accepted);
    }

    #[test]
    fn test_max_difficulty() {
        let check = validator().check(&template(KNOWN_TEMPLATE)).unwrap();
        let max = check.max_difficulty().unwrap();
        assert_eq!(max, CompactTarget(0x1c0b4d54).to_difficulty());
        assert!(max > CompactTarget(471063663).to_difficulty());
    }

    #[test]
    fn test_stake_modifier_perturbation_rejects() {
        let v = validator();
        let mut tpl = template(KNOWN_TEMPLATE);
        let before = v.check(&tpl).unwrap();

        tpl.stake_modifier += 1;
        let after = v.check(&tpl).unwrap();
        assert!(!after.accepted);
        assert_ne!(after.kernel_hash, before.kernel_hash);
        assert_eq!(after.min_target, None);
    }

    #[test]
    fn test_tx_time_changes_hash() {
        let v = validator();
        let tpl = template(KNOWN_TEMPLATE);
        let a = v.check(&tpl).unwrap();
        let b = v.check(&tpl.at_time(tpl.tx_time + 1)).unwrap();
        assert_ne!(a.kernel_hash, b.kernel_hash);
    }

    #[test]
    fn test_check_is_deterministic() {
        let v = validator();
        let tpl = template(KNOWN_TEMPLATE);
        assert_eq!(v.check(&tpl).unwrap(), v.check(&tpl.clone()).unwrap());
    }

    #[test]
    fn test_reversed_hash_order() {
        let tpl = template(REVERSED_TEMPLATE);

        let direct = validator().check(&tpl).unwrap();
        assert!(!direct.accepted);

        let legacy = validator().with_hash_order(HashOrder::Reversed);
        let check = legacy.check(&tpl).unwrap();
        assert!(check.accepted);
        assert_eq!(hex::encode(check.kernel_hash), REVERSED_HASH);

        let mut retarget = tpl.clone();
        retarget.bits = CompactTarget::from_target(&check.min_target.unwrap()).increment();
        assert_eq!(retarget.bits, CompactTarget(0x1c0473ab));
        assert!(legacy.check(&retarget).unwrap().accepted);
    }

    #[test]
    fn test_timestamp_boundaries() {
        let v = validator();
        let mut tpl = template(KNOWN_TEMPLATE);
        tpl.prev_tx_time = tpl.tx_time;
        tpl.block_from_time = tpl.tx_time - tpl.stake_min_age;

        // Earliest legal time: equal to the output's own time.
        assert!(v.check(&tpl).is_ok());

        let early = tpl.at_time(tpl.prev_tx_time - 1);
        assert_eq!(
            v.check(&early),
            Err(KernelError::TimestampViolation {
                tx_time: tpl.prev_tx_time - 1,
                prev_tx_time: tpl.prev_tx_time,
            })
        );
    }

    #[test]
    fn test_min_age_violation() {
        let v = validator();
        let tpl = template(KNOWN_TEMPLATE);
        let young = tpl.at_time(tpl.block_from_time + tpl.stake_min_age - 1);
        let err = v.check(&young).unwrap_err();
        assert!(matches!(err, KernelError::MinAgeViolation { .. }));
        assert!(err.is_candidate_violation());

        assert!(v.check(&tpl.at_time(tpl.block_from_time + tpl.stake_min_age)).is_ok());
    }

    #[test]
    fn test_zero_weight_rejects() {
        let v = validator();
        let tpl = template(KNOWN_TEMPLATE);
        // Exactly at min age under v0.3 the weight is zero.
        let mut at_min = tpl.at_time(tpl.prev_tx_time + tpl.stake_min_age);
        at_min.block_from_time = at_min.prev_tx_time;
        let check = v.check(&at_min).unwrap();
        assert_eq!(check.coin_day_weight, 0);
        assert!(!check.accepted);
        assert_eq!(check.min_target, None);
    }

    #[test]
    fn test_serialize_v03_layout() {
        let tpl = template(KNOWN_TEMPLATE);
        let mut buf = [0u8; MAX_KERNEL_SIZE];
        assert_eq!(tpl.serialize_into(&mut buf), 28);
        assert_eq!(&buf[0..8], &tpl.stake_modifier.to_le_bytes());
        assert_eq!(&buf[8..12], &1_404_111_258u32.to_le_bytes());
        assert_eq!(&buf[12..16], &81u32.to_le_bytes());
        assert_eq!(&buf[16..20], &1_404_111_247u32.to_le_bytes());
        assert_eq!(&buf[20..24], &0u32.to_le_bytes());
        assert_eq!(&buf[24..28], &1_411_662_109u32.to_le_bytes());
    }

    #[test]
    fn test_serialize_v02_layout() {
        let mut tpl = template(KNOWN_TEMPLATE);
        tpl.is_protocol_v03 = false;
        let mut buf = [0u8; MAX_KERNEL_SIZE];
        assert_eq!(tpl.serialize_into(&mut buf), 24);
        assert_eq!(&buf[0..4], &471_063_663u32.to_le_bytes());
        assert_eq!(&buf[20..24], &1_411_662_109u32.to_le_bytes());

        // v0.2 hashes bits, not the modifier.
        let v = validator();
        let a = v.check(&tpl).unwrap();
        tpl.stake_modifier += 1;
        assert_eq!(v.check(&tpl).unwrap().kernel_hash, a.kernel_hash);
    }

    #[test]
    fn test_strict_targets() {
        let mut tpl = template(KNOWN_TEMPLATE);
        tpl.bits = CompactTarget(0x1c8b4d54);

        let lenient = validator().check(&tpl).unwrap();
        assert!(!lenient.accepted);

        let strict = validator().with_strict_targets(true);
        assert_eq!(
            strict.check(&tpl),
            Err(KernelError::MalformedCompactTarget(0x1c8b4d54))
        );
    }

    #[test]
    fn test_template_json_roundtrip_names() {
        let tpl = template(KNOWN_TEMPLATE);
        let json = serde_json::to_value(&tpl).unwrap();
        assert_eq!(json["IsProtocolV03"], true);
        assert_eq!(json["Bits"], 471063663);
        assert_eq!(json["StakeModifier"], 11119442999521180503u64);
    }
}
