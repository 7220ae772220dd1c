// Signal adjustment
// Baseline subtraction, optional autogain, and linear remap to output intensity
//
// Algorithm (per frame, only once calibration is Ready):
// 1. Clamp: adjusted = max(0, raw - baseline)
// 2. Autogain: if the frame maximum exceeds max_noise, stretch every cell above
//    noise from [0, max] onto [min_input, max_input]
// 3. Remap: clamp to [min_input, max_input] and map linearly onto
//    [min_output, max_output]
//
// All arithmetic is integer so replayed sessions reproduce the same values.

use crate::config::{ConfigError, NoiseThresholds, PipelineConfig, RemapRanges};

/// Summary of one adjusted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustOutcome {
    /// Largest clamped value before autogain
    pub max_adjusted: i32,

    /// Whether autogain rescaled this frame
    pub autogain_applied: bool,
}

/// Stateless per-frame signal transform
#[derive(Debug, Clone, Copy)]
pub struct SignalAdjuster {
    ranges: RemapRanges,
    noise: NoiseThresholds,
    autogain: bool,
}

impl SignalAdjuster {
    /// Build an adjuster, rejecting a zero-width input range up front
    pub fn new(
        ranges: RemapRanges,
        noise: NoiseThresholds,
        autogain: bool,
    ) -> Result<Self, ConfigError> {
        if ranges.min_input == ranges.max_input {
            return Err(ConfigError::DegenerateInputRange(ranges.min_input));
        }
        Ok(SignalAdjuster {
            ranges,
            noise,
            autogain,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(config.ranges, config.noise, config.capabilities.autogain)
    }

    pub fn autogain_enabled(&self) -> bool {
        self.autogain
    }

    /// Run all three steps over a frame
    pub fn adjust(
        &self,
        raw: &[u32],
        baseline: &[u32],
        adjusted: &mut [i32],
        pixels: &mut [i32],
    ) -> AdjustOutcome {
        let max_adjusted = clamp_to_baseline(raw, baseline, adjusted);

        let autogain_applied = self.autogain && self.apply_autogain(adjusted, max_adjusted);

        for (pixel, &value) in pixels.iter_mut().zip(adjusted.iter()) {
            *pixel = self.remap(value);
        }

        AdjustOutcome {
            max_adjusted,
            autogain_applied,
        }
    }

    /// Stretch touch cells onto the input range
    /// Returns false for a no-touch frame, which passes through unchanged.
    pub fn apply_autogain(&self, values: &mut [i32], max_adjusted: i32) -> bool {
        if max_adjusted <= self.noise.max_noise {
            return false;
        }

        let min_in = self.ranges.min_input as i64;
        let span = self.ranges.max_input as i64 - min_in;
        let max = max_adjusted as i64;

        for value in values.iter_mut().filter(|v| **v > self.noise.noise) {
            *value = (min_in + *value as i64 * span / max) as i32;
        }
        true
    }

    /// Map one adjusted value to output intensity
    pub fn remap(&self, value: i32) -> i32 {
        let RemapRanges {
            min_input,
            max_input,
            min_output,
            max_output,
        } = self.ranges;

        let lo = min_input.min(max_input);
        let hi = min_input.max(max_input);
        let clamped = value.clamp(lo, hi) as i128;

        // Both factors span up to 2^32, so the product needs 128 bits.
        // The quotient stays between min_output and max_output.
        let out = min_output as i128
            + (clamped - min_input as i128) * (max_output as i128 - min_output as i128)
                / (max_input as i128 - min_input as i128);
        out as i32
    }
}

/// adjusted = max(0, raw - baseline); returns the frame maximum
pub fn clamp_to_baseline(raw: &[u32], baseline: &[u32], adjusted: &mut [i32]) -> i32 {
    let mut max_adjusted = 0;
    for ((out, &r), &b) in adjusted.iter_mut().zip(raw).zip(baseline) {
        let diff = (r as i64 - b as i64).max(0).min(i32::MAX as i64) as i32;
        *out = diff;
        max_adjusted = max_adjusted.max(diff);
    }
    max_adjusted
}
