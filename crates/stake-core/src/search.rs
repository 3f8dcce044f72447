//! Brute-force search for accepted kernels over a time window.
//!
//! Every second in the window is one independent kernel check, so a
//! window can be split into disjoint shards and searched in parallel.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::compact::{from_difficulty, CompactTarget};
use crate::error::KernelError;
use crate::hash::significant_bits;
use crate::kernel::{KernelCheck, KernelTemplate, KernelValidator};

/// Inclusive range of candidate times, one second apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    pub from: i64,
    pub to: i64,
}

impl SearchWindow {
    pub fn new(from: i64, to: i64) -> Result<Self, KernelError> {
        // The length must fit in a u64.
        if from > to || to.abs_diff(from) == u64::MAX {
            return Err(KernelError::InvalidWindow { from, to });
        }
        Ok(SearchWindow { from, to })
    }

    /// Window of `span` seconds starting at `from`, end included.
    pub fn starting_at(from: i64, span: i64) -> Result<Self, KernelError> {
        Self::new(from, from.saturating_add(span))
    }

    /// Number of candidate times.
    pub fn len(&self) -> u64 {
        self.to.abs_diff(self.from).saturating_add(1)
    }

    pub fn times(&self) -> RangeInclusive<i64> {
        self.from..=self.to
    }

    /// Split into at most `parts` contiguous, disjoint windows covering
    /// this one, in order.
    pub fn split(&self, parts: usize) -> Vec<SearchWindow> {
        let len = self.len();
        let parts = (parts.max(1) as u64).min(len);
        let base = len / parts;
        let extra = len % parts;

        let mut windows = Vec::with_capacity(parts as usize);
        let mut from = self.from;
        for i in 0..parts {
            let size = base + u64::from(i < extra);
            let to = from.wrapping_add_unsigned(size - 1);
            windows.push(SearchWindow { from, to });
            from = to.saturating_add(1);
        }
        windows
    }
}

/// Where the per-coin-day target for a search comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSpec {
    /// A given compact target.
    Compact(CompactTarget),
    /// A synthetic difficulty.
    Difficulty(f64),
    /// The network target eased so that the effective difficulty is
    /// `fraction` of the network's (0.8 = 80%).
    NetworkFraction { bits: CompactTarget, fraction: f64 },
}

impl TargetSpec {
    /// Compact target to search against.
    pub fn resolve(&self) -> Result<CompactTarget, KernelError> {
        match *self {
            TargetSpec::Compact(bits) => Ok(bits),
            TargetSpec::Difficulty(difficulty) => {
                Ok(CompactTarget::from_target(&from_difficulty(difficulty)?))
            }
            TargetSpec::NetworkFraction { bits, fraction } => {
                if !fraction.is_finite() || fraction <= 0.0 {
                    return Err(KernelError::InvalidDifficulty(fraction));
                }
                // Scaled in thousandths.
                let permille = (1000.0 / fraction) as u64;
                let target = bits.decode() * permille / 1000u32;
                Ok(CompactTarget::encode(&target))
            }
        }
    }
}

/// An accepted kernel found by a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelHit {
    /// Candidate time that was accepted.
    pub tx_time: i64,
    /// Kernel hash, big-endian hex in serialized form.
    #[serde(serialize_with = "hash_to_hex")]
    pub kernel_hash: [u8; 32],
    /// Significant bits of the kernel hash.
    pub hash_bits: u32,
    /// Highest difficulty at which this kernel still passes.
    pub max_difficulty: Option<f64>,
    #[serde(skip)]
    pub min_target: Option<BigUint>,
}

impl KernelHit {
    pub fn from_check(tx_time: i64, check: KernelCheck) -> Self {
        KernelHit {
            tx_time,
            hash_bits: significant_bits(&check.kernel_hash),
            max_difficulty: check.max_difficulty(),
            kernel_hash: check.kernel_hash,
            min_target: check.min_target,
        }
    }
}

fn hash_to_hex<S: Serializer>(hash: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(hash))
}

/// Cooperative cancellation flag shared between a search and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of searching (part of) a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// Accepted kernels in time order.
    pub hits: Vec<KernelHit>,
    /// Candidate times checked.
    pub checked: u64,
    /// The search stopped early on cancellation.
    pub cancelled: bool,
}

impl SearchOutcome {
    #[cfg(feature = "parallel")]
    fn merge(&mut self, other: SearchOutcome) {
        self.hits.extend(other.hits);
        self.checked += other.checked;
        self.cancelled |= other.cancelled;
    }
}

/// Resumable walk over a window.
///
/// Each call to [`KernelSearch::step_batch`] continues where the last one
/// stopped, so a caller can interleave the search with other work.
#[derive(Debug, Clone)]
pub struct KernelSearch {
    validator: KernelValidator,
    template: KernelTemplate,
    window: SearchWindow,
    next: Option<i64>,
}

impl KernelSearch {
    pub fn new(validator: KernelValidator, template: KernelTemplate, window: SearchWindow) -> Self {
        KernelSearch {
            validator,
            template,
            window,
            next: Some(window.from),
        }
    }

    pub fn window(&self) -> SearchWindow {
        self.window
    }

    pub fn template(&self) -> &KernelTemplate {
        &self.template
    }

    /// Search against `bits` from the current position on.
    pub fn retarget(&mut self, bits: CompactTarget) {
        self.template.bits = bits;
    }

    /// Check the remaining candidates with `validator`.
    pub fn set_validator(&mut self, validator: KernelValidator) {
        self.validator = validator;
    }

    /// Next candidate time, or `None` when the window is exhausted.
    pub fn position(&self) -> Option<i64> {
        self.next
    }

    pub fn is_finished(&self) -> bool {
        self.next.is_none()
    }

    /// Check up to `max_steps` further candidate times.
    ///
    /// An ineligible candidate fails the whole batch; since eligibility
    /// only improves with time, this can only happen on the first step
    /// of a window that opens too early.
    pub fn step_batch(
        &mut self,
        max_steps: u64,
        cancel: Option<&CancelToken>,
    ) -> Result<SearchOutcome, KernelError> {
        let mut outcome = SearchOutcome::default();

        while outcome.checked < max_steps {
            let Some(tx_time) = self.next else { break };
            if cancel.is_some_and(CancelToken::is_cancelled) {
                outcome.cancelled = true;
                break;
            }

            self.template.tx_time = tx_time;
            let check = self.validator.check(&self.template)?;
            outcome.checked += 1;

            if check.accepted {
                let hit = KernelHit::from_check(tx_time, check);
                debug!(
                    tx_time,
                    hash = %hex::encode(hit.kernel_hash),
                    hash_bits = hit.hash_bits,
                    max_difficulty = ?hit.max_difficulty,
                    "kernel accepted"
                );
                outcome.hits.push(hit);
            }

            self.next = if tx_time < self.window.to {
                Some(tx_time + 1)
            } else {
                None
            };
        }

        Ok(outcome)
    }

    /// Run to the end of the window (or until cancelled).
    pub fn run(mut self, cancel: Option<&CancelToken>) -> Result<SearchOutcome, KernelError> {
        self.step_batch(u64::MAX, cancel)
    }
}

/// Search a whole window on the current thread.
pub fn search(
    validator: &KernelValidator,
    template: &KernelTemplate,
    window: SearchWindow,
    cancel: Option<&CancelToken>,
) -> Result<SearchOutcome, KernelError> {
    let outcome = KernelSearch::new(*validator, template.clone(), window).run(cancel)?;
    log_outcome(window, &outcome);
    Ok(outcome)
}

/// Search a window split into `shards` pieces across the rayon pool.
///
/// Hits are merged in time order. The first ineligible shard's error is
/// returned.
#[cfg(feature = "parallel")]
pub fn search_parallel(
    validator: &KernelValidator,
    template: &KernelTemplate,
    window: SearchWindow,
    shards: usize,
    cancel: Option<&CancelToken>,
) -> Result<SearchOutcome, KernelError> {
    use rayon::prelude::*;

    let parts = window
        .split(shards)
        .into_par_iter()
        .map(|shard| KernelSearch::new(*validator, template.clone(), shard).run(cancel))
        .collect::<Result<Vec<_>, _>>()?;

    let mut outcome = SearchOutcome::default();
    for part in parts {
        outcome.merge(part);
    }
    outcome.hits.sort_by_key(|hit| hit.tx_time);
    log_outcome(window, &outcome);
    Ok(outcome)
}

fn log_outcome(window: SearchWindow, outcome: &SearchOutcome) {
    if outcome.cancelled {
        warn!(
            from = window.from,
            to = window.to,
            checked = outcome.checked,
            "kernel search cancelled"
        );
    } else {
        info!(
            from = window.from,
            to = window.to,
            checked = outcome.checked,
            hits = outcome.hits.len(),
            "kernel search finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    const KNOWN_TIME: i64 = 1_411_662_109;

    fn known_template() -> KernelTemplate {
        KernelTemplate {
            bits: CompactTarget(471_063_663),
            block_from_time: 1_404_111_258,
            tx_time: KNOWN_TIME,
            stake_modifier: 11_119_442_999_521_180_503,
            prev_tx_offset: 81,
            prev_tx_time: 1_404_111_247,
            prev_tx_out_index: 0,
            prev_tx_out_value: 300_000_000,
            is_protocol_v03: true,
            stake_min_age: 2_592_000,
        }
    }

    fn validator() -> KernelValidator {
        KernelValidator::for_network(Network::Mainnet)
    }

    #[test]
    fn test_window_validation() {
        assert!(SearchWindow::new(10, 10).is_ok());
        assert_eq!(
            SearchWindow::new(11, 10),
            Err(KernelError::InvalidWindow { from: 11, to: 10 })
        );
        assert_eq!(SearchWindow::starting_at(100, 60).unwrap().len(), 61);
    }

    #[test]
    fn test_window_split_covers_window() {
        let window = SearchWindow::new(0, 9).unwrap();
        let parts = window.split(3);
        assert_eq!(
            parts,
            vec![
                SearchWindow { from: 0, to: 3 },
                SearchWindow { from: 4, to: 6 },
                SearchWindow { from: 7, to: 9 },
            ]
        );

        // Never more shards than seconds.
        assert_eq!(SearchWindow::new(5, 6).unwrap().split(8).len(), 2);
        assert_eq!(window.split(0), vec![window]);
    }

    #[test]
    fn test_window_at_integer_limits() {
        assert_eq!(
            SearchWindow::new(i64::MIN, i64::MAX),
            Err(KernelError::InvalidWindow {
                from: i64::MIN,
                to: i64::MAX
            })
        );

        let widest = SearchWindow::new(i64::MIN, i64::MAX - 1).unwrap();
        assert_eq!(widest.len(), u64::MAX);
        let parts = widest.split(4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].from, i64::MIN);
        assert_eq!(parts[3].to, i64::MAX - 1);
        for pair in parts.windows(2) {
            assert_eq!(pair[0].to + 1, pair[1].from);
        }
    }

    #[test]
    fn test_retarget_applies_to_remaining_batches() {
        let window = SearchWindow::new(KNOWN_TIME, KNOWN_TIME).unwrap();
        let mut search = KernelSearch::new(validator(), known_template(), window);
        // The known kernel only passes down to 0x1c0b4d54.
        search.retarget(CompactTarget(0x1c0b4d53));
        let outcome = search.step_batch(10, None).unwrap();
        assert_eq!(outcome.checked, 1);
        assert!(outcome.hits.is_empty());
        assert_eq!(search.template().bits, CompactTarget(0x1c0b4d53));
    }

    #[test]
    fn test_search_finds_known_kernel() {
        let window = SearchWindow::new(KNOWN_TIME - 5, KNOWN_TIME + 5).unwrap();
        let outcome = search(&validator(), &known_template(), window, None).unwrap();
        assert_eq!(outcome.checked, 11);
        assert!(!outcome.cancelled);

        let hit = outcome
            .hits
            .iter()
            .find(|hit| hit.tx_time == KNOWN_TIME)
            .expect("known kernel is found");
        assert_eq!(hit.hash_bits, 234);
        assert_eq!(hit.max_difficulty, Some(CompactTarget(0x1c0b4d54).to_difficulty()));
    }

    #[test]
    fn test_single_second_window() {
        let window = SearchWindow::new(KNOWN_TIME, KNOWN_TIME).unwrap();
        let outcome = search(&validator(), &known_template(), window, None).unwrap();
        assert_eq!(outcome.checked, 1);
        assert_eq!(outcome.hits.len(), 1);
    }

    #[test]
    fn test_batches_resume() {
        let window = SearchWindow::new(KNOWN_TIME - 3, KNOWN_TIME + 3).unwrap();
        let mut search = KernelSearch::new(validator(), known_template(), window);

        let first = search.step_batch(4, None).unwrap();
        assert_eq!(first.checked, 4);
        assert_eq!(search.position(), Some(KNOWN_TIME + 1));

        let second = search.step_batch(100, None).unwrap();
        assert_eq!(second.checked, 3);
        assert!(search.is_finished());

        let done = search.step_batch(100, None).unwrap();
        assert_eq!(done.checked, 0);

        let total = first.hits.len() + second.hits.len();
        let whole = super::search(&validator(), &known_template(), window, None).unwrap();
        assert_eq!(total, whole.hits.len());
    }

    #[test]
    fn test_early_window_is_fatal() {
        let tpl = known_template();
        let opens = tpl.block_from_time + tpl.stake_min_age;
        let window = SearchWindow::new(opens - 1, opens + 10).unwrap();
        let err = search(&validator(), &tpl, window, None).unwrap_err();
        assert!(matches!(err, KernelError::MinAgeViolation { .. }));
    }

    #[test]
    fn test_cancelled_search() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let window = SearchWindow::new(KNOWN_TIME, KNOWN_TIME + 1000).unwrap();
        let outcome = search(&validator(), &known_template(), window, Some(&cancel)).unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.checked, 0);
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_sequential() {
        let window = SearchWindow::new(KNOWN_TIME - 200, KNOWN_TIME + 200).unwrap();
        let sequential = search(&validator(), &known_template(), window, None).unwrap();
        let parallel = search_parallel(&validator(), &known_template(), window, 4, None).unwrap();
        assert_eq!(parallel.checked, 401);
        assert_eq!(parallel.hits, sequential.hits);
    }

    #[test]
    fn test_target_spec_difficulty() {
        let bits = TargetSpec::Difficulty(CompactTarget(0x1c147e17).to_difficulty())
            .resolve()
            .unwrap();
        assert_eq!(bits, CompactTarget(0x1c147e17));
        assert!(TargetSpec::Difficulty(0.0).resolve().is_err());
    }

    #[test]
    fn test_target_spec_network_fraction() {
        let bits = CompactTarget(0x1c147e17);
        let eased = TargetSpec::NetworkFraction {
            bits,
            fraction: 0.8,
        }
        .resolve()
        .unwrap();
        assert!(eased.decode() > bits.decode());
        let ratio = bits.to_difficulty() / eased.to_difficulty();
        assert!((ratio - 1.25).abs() < 1e-3);

        let same = TargetSpec::NetworkFraction {
            bits,
            fraction: 1.0,
        }
        .resolve()
        .unwrap();
        assert_eq!(same, bits);

        assert!(TargetSpec::NetworkFraction {
            bits,
            fraction: -0.8
        }
        .resolve()
        .is_err());
        assert_eq!(TargetSpec::Compact(bits).resolve(), Ok(bits));
    }

    #[test]
    fn test_hit_serializes_hex_hash() {
        let window = SearchWindow::new(KNOWN_TIME, KNOWN_TIME).unwrap();
        let outcome = search(&validator(), &known_template(), window, None).unwrap();
        let json = serde_json::to_value(&outcome.hits[0]).unwrap();
        assert_eq!(
            json["kernel_hash"],
            "000002f826df56df766a16ab4fa83e5f06f28bed736fa56925b8c5dd71121239"
        );
        assert_eq!(json["tx_time"], KNOWN_TIME);
        assert!(json.get("min_target").is_none());
    }
}
