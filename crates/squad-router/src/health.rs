//! Destination health, derived entirely from the recent routing-event
//! window -- there is no persisted circuit-breaker state: a destination's
//! circuit "closes" the moment its trailing block rate drops, simply
//! because the window then contains fewer blocked events.

use std::collections::BTreeMap;

pub use squad_core::config::HealthConfig;

use crate::error::Result;
use crate::event::{RoutingEvent, RoutingEventEmitter, RoutingStatus};

/// Health classification for a destination or for the router overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    InsufficientData,
    Healthy,
    Warn,
    Critical,
}

impl HealthConfig {
    pub fn score(&self, block_rate: f64, total: usize) -> HealthStatus {
        if total < self.min_events {
            return HealthStatus::InsufficientData;
        }
        if block_rate >= self.critical_block_rate {
            return HealthStatus::Critical;
        }
        if block_rate >= self.warn_block_rate {
            return HealthStatus::Warn;
        }
        HealthStatus::Healthy
    }
}

/// Per-destination health snapshot.
#[derive(Debug, Clone)]
pub struct DestinationHealth {
    pub total: usize,
    pub blocked: usize,
    pub routed: usize,
    pub block_rate: f64,
    pub status: HealthStatus,
    pub throttled: bool,
    pub circuit_open: bool,
    pub last_timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Counts split by routed/blocked for a grouping key (source, destination,
/// or priority).
#[derive(Debug, Clone, Default)]
pub struct GroupCounts {
    pub total: usize,
    pub routed: usize,
    pub blocked: usize,
}

/// Aggregate summary across the whole routing-event window.
#[derive(Debug, Clone, Default)]
pub struct HealthSummary {
    pub total: usize,
    pub routed: usize,
    pub blocked: usize,
    pub by_source: BTreeMap<String, GroupCounts>,
    pub by_destination: BTreeMap<String, GroupCounts>,
    pub by_priority: BTreeMap<String, GroupCounts>,
    pub block_rate: f64,
    pub overall_status: HealthStatus,
}

/// Reads the routing-event log and answers health queries against it.
pub struct HealthView {
    emitter: RoutingEventEmitter,
    window: usize,
}

impl HealthView {
    pub fn new(squad_dir: impl AsRef<std::path::Path>, window: usize) -> Self {
        Self {
            emitter: RoutingEventEmitter::new(squad_dir),
            window,
        }
    }

    fn load_window(&self) -> Result<Vec<RoutingEvent>> {
        let mut events = self.emitter.read_all()?;
        if events.len() > self.window {
            let drop = events.len() - self.window;
            events.drain(0..drop);
        }
        Ok(events)
    }

    pub fn summarize(&self, config: &HealthConfig) -> Result<HealthSummary> {
        let events = self.load_window()?;
        let mut summary = HealthSummary::default();

        for event in &events {
            let priority = event
                .metadata
                .get("priority")
                .and_then(|v| v.as_str())
                .unwrap_or("normal")
                .to_string();

            summary.total += 1;
            let routed = event.status == RoutingStatus::Routed;
            if routed {
                summary.routed += 1;
            } else {
                summary.blocked += 1;
            }

            for (bucket, key) in [
                (&mut summary.by_source, event.source.clone()),
                (&mut summary.by_destination, event.destination.clone()),
                (&mut summary.by_priority, priority),
            ] {
                let entry = bucket.entry(key).or_default();
                entry.total += 1;
                if routed {
                    entry.routed += 1;
                } else {
                    entry.blocked += 1;
                }
            }
        }

        summary.block_rate = if summary.total > 0 {
            summary.blocked as f64 / summary.total as f64
        } else {
            0.0
        };
        summary.overall_status = config.score(summary.block_rate, summary.total);
        Ok(summary)
    }

    pub fn destination_health(&self, destination: &str, config: &HealthConfig) -> Result<DestinationHealth> {
        let events: Vec<RoutingEvent> = self.load_window()?.into_iter().filter(|e| e.destination == destination).collect();
        let total = events.len();
        let blocked = events.iter().filter(|e| e.status == RoutingStatus::Blocked).count();
        let routed = events.iter().filter(|e| e.status == RoutingStatus::Routed).count();
        let block_rate = if total > 0 { blocked as f64 / total as f64 } else { 0.0 };
        let status = config.score(block_rate, total);
        let throttled = block_rate >= config.throttle_block_rate && total >= config.min_events;
        let circuit_open = block_rate >= config.circuit_breaker_block_rate && total >= config.min_events;
        let last_timestamp = events.last().map(|e| e.timestamp);

        Ok(DestinationHealth {
            total,
            blocked,
            routed,
            block_rate,
            status,
            throttled,
            circuit_open,
            last_timestamp,
        })
    }

    pub fn emitter(&self) -> &RoutingEventEmitter {
        &self.emitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn emit_n(emitter: &RoutingEventEmitter, destination: &str, blocked: usize, routed: usize) {
        for _ in 0..blocked {
            emitter
                .emit(&RoutingEvent::create("test", destination, RoutingStatus::Blocked, "org", None, None, None, BTreeMap::new()))
                .unwrap();
        }
        for _ in 0..routed {
            emitter
                .emit(&RoutingEvent::create("test", destination, RoutingStatus::Routed, "org", None, None, None, BTreeMap::new()))
                .unwrap();
        }
    }

    #[test]
    fn circuit_opens_past_the_block_rate_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let view = HealthView::new(dir.path(), 200);
        emit_n(view.emitter(), "worker-a", 8, 2);

        let config = HealthConfig::default();
        let health = view.destination_health("worker-a", &config).unwrap();
        assert!(health.circuit_open);
        assert!(health.throttled);
    }

    #[test]
    fn insufficient_events_never_trip_the_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let view = HealthView::new(dir.path(), 200);
        emit_n(view.emitter(), "worker-a", 2, 0);

        let config = HealthConfig::default();
        let health = view.destination_health("worker-a", &config).unwrap();
        assert!(!health.circuit_open);
        assert_eq!(health.status, HealthStatus::InsufficientData);
    }
}
