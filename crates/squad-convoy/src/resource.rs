//! Host resource sampling and the auto-tuner that derives safe convoy
//! parallelism from it.
//!
//! No original Python module backs this one; `ai_squad.core.convoy` calls
//! out to a `resource_monitor` singleton that isn't part of the retrieved
//! corpus, so its contract is inferred from spec prose and built fresh here
//! against `sysinfo`, the host-metrics crate the wider example pack reaches
//! for (e.g. `examples/other_examples/manifests/Alb-O-xeno`).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::debug;

use squad_core::config::ConvoyConfig;

/// A single CPU%/memory% reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Samples host CPU and memory usage, caching the reading for
/// `sample_interval` so a burst of callers doesn't hammer `/proc` on every
/// scheduling decision.
pub struct ResourceMonitor {
    system: Mutex<System>,
    last_sample: Mutex<Option<(Instant, ResourceSample)>>,
    sample_interval: Duration,
}

impl ResourceMonitor {
    pub fn new(sample_interval: Duration) -> Self {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            last_sample: Mutex::new(None),
            sample_interval,
        }
    }

    pub fn from_config(config: &ConvoyConfig) -> Self {
        Self::new(Duration::from_secs(config.sample_interval_seconds))
    }

    /// Returns the current cached sample, refreshing it if it has gone
    /// stale past `sample_interval`.
    pub fn get_current_metrics(&self) -> ResourceSample {
        let mut last = self.last_sample.lock().unwrap();
        if let Some((taken_at, sample)) = *last {
            if taken_at.elapsed() < self.sample_interval {
                return sample;
            }
        }

        let mut system = self.system.lock().unwrap();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_percent = system.global_cpu_usage();
        let total = system.total_memory();
        let memory_percent = if total > 0 { (system.used_memory() as f64 / total as f64 * 100.0) as f32 } else { 0.0 };

        let sample = ResourceSample { cpu_percent, memory_percent };
        *last = Some((Instant::now(), sample));
        debug!(cpu_percent, memory_percent, "sampled host resources");
        sample
    }

    /// Scales parallelism down from `max_parallel` towards `baseline` as
    /// headroom shrinks, never going below the floor.
    ///
    /// Full parallelism below half of `cpu_threshold`/`memory_threshold`;
    /// linear interpolation down to `baseline` as usage climbs from there to
    /// the threshold itself; pinned at `baseline` past the threshold.
    pub fn calculate_optimal_parallelism(&self, max_parallel: usize, baseline: usize, config: &ConvoyConfig) -> usize {
        if max_parallel <= baseline {
            return max_parallel;
        }
        let sample = self.get_current_metrics();
        let cpu_headroom = Self::headroom_fraction(sample.cpu_percent, config.cpu_threshold);
        let memory_headroom = Self::headroom_fraction(sample.memory_percent, config.memory_threshold);
        let headroom = cpu_headroom.min(memory_headroom);

        let span = (max_parallel - baseline) as f32;
        let optimal = baseline as f32 + span * headroom;
        optimal.round().clamp(baseline as f32, max_parallel as f32) as usize
    }

    /// `1.0` well under the threshold, `0.0` at or beyond it, scaling
    /// linearly across the band between half the threshold and the
    /// threshold itself.
    fn headroom_fraction(usage_percent: f32, threshold: f32) -> f32 {
        if threshold <= 0.0 {
            return 1.0;
        }
        let floor = threshold * 0.5;
        if usage_percent <= floor {
            1.0
        } else if usage_percent >= threshold {
            0.0
        } else {
            1.0 - (usage_percent - floor) / (threshold - floor)
        }
    }

    /// True once either CPU or memory usage is at or past its threshold.
    pub fn should_throttle(&self, cpu_threshold: f32, memory_threshold: f32) -> bool {
        let sample = self.get_current_metrics();
        sample.cpu_percent >= cpu_threshold || sample.memory_percent >= memory_threshold
    }

    /// `1.0` (no throttle) down to `0.0` (full throttle) based on how far
    /// past the worse of the two thresholds the host currently is.
    pub fn get_throttle_factor(&self, cpu_threshold: f32, memory_threshold: f32) -> f32 {
        let sample = self.get_current_metrics();
        let cpu_factor = Self::headroom_fraction(sample.cpu_percent, cpu_threshold);
        let memory_factor = Self::headroom_fraction(sample.memory_percent, memory_threshold);
        cpu_factor.min(memory_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headroom_fraction_is_full_below_half_threshold() {
        assert_eq!(ResourceMonitor::headroom_fraction(10.0, 80.0), 1.0);
    }

    #[test]
    fn headroom_fraction_is_zero_at_threshold() {
        assert_eq!(ResourceMonitor::headroom_fraction(80.0, 80.0), 0.0);
    }

    #[test]
    fn calculate_optimal_parallelism_never_drops_below_baseline() {
        let monitor = ResourceMonitor::new(Duration::from_secs(60));
        let config = ConvoyConfig::default();
        let optimal = monitor.calculate_optimal_parallelism(8, 2, &config);
        assert!(optimal >= 2 && optimal <= 8);
    }

    #[test]
    fn equal_max_and_baseline_short_circuits() {
        let monitor = ResourceMonitor::new(Duration::from_secs(60));
        let config = ConvoyConfig::default();
        assert_eq!(monitor.calculate_optimal_parallelism(4, 4, &config), 4);
    }
}
