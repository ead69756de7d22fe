//! Difficulty retarget rules.
//!
//! A rule sees the timestamps and `nBits` of the headers immediately preceding
//! the height being validated (oldest first) and returns the `nBits` the next
//! header must carry. Rules are network parameters, so they are trait objects.
use core::fmt;

use crate::difficulty::filter::DiffError;
use crate::difficulty::target::Target;

/// Timestamp and compact target of one prior header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitsSample {
    pub time: u32,
    pub bits: u32,
}

pub trait Retarget: fmt::Debug + Send + Sync {
    /// Number of headers immediately preceding the validated height the rule
    /// wants to see. Fewer may be supplied near genesis.
    fn window(&self) -> u32;

    /// Expected `nBits` for the header at `height`.
    fn next_bits(&self, height: u32, prior: &[BitsSample]) -> u32;
}

/// Checks a header's `nBits` against a retarget rule.
pub fn verify_retarget(
    rule: &dyn Retarget,
    height: u32,
    prior: &[BitsSample],
    found: u32,
) -> Result<(), DiffError> {
    let expected = rule.next_bits(height, prior);
    if found != expected {
        return Err(DiffError::BitsMismatch { expected, found });
    }
    Ok(())
}

/// Constant difficulty, used by regtest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedBits(pub u32);

impl Retarget for FixedBits {
    fn window(&self) -> u32 {
        0
    }

    fn next_bits(&self, _height: u32, _prior: &[BitsSample]) -> u32 {
        self.0
    }
}

/// Damped averaging-window retarget (DigiShield v3 shape).
///
/// The new target is the mean of the last `averaging_window` targets, scaled
/// by the damped, clamped ratio between the actual timespan (difference of two
/// medians of `median_span` timestamps) and the expected one. With too little
/// history the rule answers the PoW limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AveragingWindow {
    pub averaging_window: usize,
    pub median_span: usize,
    pub max_adjust_down: i64,
    pub max_adjust_up: i64,
    pub damping_factor: i64,
    pub target_spacing: i64,
    pub pow_limit: Target,
}

const ADJUST_DEN: i64 = 100;

impl AveragingWindow {
    pub fn new(pow_limit: Target, target_spacing: i64) -> Self {
        AveragingWindow {
            averaging_window: 17,
            median_span: 11,
            max_adjust_down: 32,
            max_adjust_up: 16,
            damping_factor: 4,
            target_spacing,
            pow_limit,
        }
    }

    fn window_timespan(&self) -> i64 {
        self.averaging_window as i64 * self.target_spacing
    }

    fn min_timespan(&self) -> i64 {
        self.window_timespan() * (ADJUST_DEN - self.max_adjust_up) / ADJUST_DEN
    }

    fn max_timespan(&self) -> i64 {
        self.window_timespan() * (ADJUST_DEN + self.max_adjust_down) / ADJUST_DEN
    }

    fn median(&self, samples: &[BitsSample]) -> i64 {
        let mut times: Vec<u32> = samples.iter().map(|s| s.time).collect();
        times.sort_unstable();
        i64::from(times[times.len() / 2])
    }

    /// `samples` holds exactly `averaging_window + median_span` entries.
    fn damped_timespan(&self, samples: &[BitsSample]) -> i64 {
        let recent = self.median(&samples[samples.len() - self.median_span..]);
        let past = self.median(&samples[..self.median_span]);
        let expected = self.window_timespan();

        // Identical timestamps keep the difficulty unchanged.
        let actual = match recent - past {
            0 => expected,
            span => span,
        };
        let damped = expected + (actual - expected) / self.damping_factor;
        damped.clamp(self.min_timespan(), self.max_timespan())
    }

    fn mean_target(&self, samples: &[BitsSample]) -> Option<Target> {
        let recent = &samples[samples.len() - self.averaging_window..];
        let mut acc = Target::ZERO;
        for sample in recent {
            acc = acc.checked_add(&Target::from_compact(sample.bits))?;
        }
        Some(acc.div_u32(self.averaging_window as u32))
    }
}

impl Retarget for AveragingWindow {
    fn window(&self) -> u32 {
        (self.averaging_window + self.median_span) as u32
    }

    fn next_bits(&self, _height: u32, prior: &[BitsSample]) -> u32 {
        let needed = self.averaging_window + self.median_span;
        if prior.len() < needed {
            return self.pow_limit.to_compact();
        }
        let samples = &prior[prior.len() - needed..];

        let timespan = self.damped_timespan(samples);
        let scaled = self.mean_target(samples).and_then(|mean| {
            mean.div_u32(self.window_timespan() as u32)
                .checked_mul_u32(timespan as u32)
        });

        match scaled {
            Some(target) if target <= self.pow_limit => target.to_compact(),
            _ => self.pow_limit.to_compact(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT_BITS: u32 = 0x1e0f_ffff;
    const BITS: u32 = 0x1d0f_fff0;
    const SPACING: i64 = 60;

    fn rule() -> AveragingWindow {
        AveragingWindow::new(Target::from_compact(LIMIT_BITS), SPACING)
    }

    fn evenly_spaced(count: usize, spacing: u32) -> Vec<BitsSample> {
        (0..count as u32)
            .map(|i| BitsSample {
                time: 1_500_000_000 + i * spacing,
                bits: BITS,
            })
            .collect()
    }

    #[test]
    fn fixed_bits_ignores_history() {
        let rule = FixedBits(0x207f_ffff);
        assert_eq!(rule.window(), 0);
        assert_eq!(rule.next_bits(1234, &[]), 0x207f_ffff);
        assert_eq!(
            verify_retarget(&rule, 1, &[], 0x1d00_ffff),
            Err(DiffError::BitsMismatch {
                expected: 0x207f_ffff,
                found: 0x1d00_ffff
            })
        );
    }

    #[test]
    fn short_history_answers_pow_limit() {
        let prior = evenly_spaced(5, SPACING as u32);
        assert_eq!(rule().next_bits(5, &prior), LIMIT_BITS);
    }

    #[test]
    fn on_schedule_blocks_keep_difficulty() {
        let prior = evenly_spaced(28, SPACING as u32);
        assert_eq!(rule().next_bits(28, &prior), BITS);
    }

    #[test]
    fn slow_blocks_ease_and_fast_blocks_tighten() {
        let rule = rule();
        let eased = Target::from_compact(rule.next_bits(28, &evenly_spaced(28, 120)));
        let tightened = Target::from_compact(rule.next_bits(28, &evenly_spaced(28, 30)));
        let steady = Target::from_compact(BITS);
        assert!(eased > steady);
        assert!(tightened < steady);
    }

    #[test]
    fn adjustment_is_clamped() {
        let rule = rule();
        let extreme = Target::from_compact(rule.next_bits(28, &evenly_spaced(28, 100_000)));
        let capped = Target::from_compact(BITS)
            .div_u32(rule.window_timespan() as u32)
            .checked_mul_u32(rule.max_timespan() as u32)
            .unwrap();
        assert_eq!(extreme.to_compact(), capped.to_compact());
    }
}
