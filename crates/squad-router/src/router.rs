//! The org-plane router: filters candidates through a [`PolicyRule`], then
//! picks among the policy-permitted ones by health, preferring a fully
//! healthy destination over a throttled one and never routing to one whose
//! circuit is open.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use squad_core::config::HealthConfig;
use tracing::{info, instrument};

use crate::error::Result;
use crate::event::{RoutingEvent, RoutingEventEmitter, RoutingStatus};
use crate::health::HealthView;
use crate::policy::{Candidate, PolicyRule};

/// Inputs to a single routing decision.
pub struct RouteRequest {
    pub candidates: Vec<Candidate>,
    pub requested_capability_tags: Vec<String>,
    pub data_sensitivity: String,
    pub trust_level: String,
    pub priority: String,
    pub metadata: BTreeMap<String, Value>,
}

impl RouteRequest {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            requested_capability_tags: Vec::new(),
            data_sensitivity: "public".to_string(),
            trust_level: "low".to_string(),
            priority: "normal".to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Organization-plane router enforcing policy with health-aware destination
/// selection.
pub struct OrgRouter {
    policy: PolicyRule,
    emitter: RoutingEventEmitter,
    health: HealthView,
    health_config: HealthConfig,
}

impl OrgRouter {
    pub fn new(squad_dir: impl AsRef<Path>, policy: PolicyRule, health_config: HealthConfig) -> Self {
        let squad_dir = squad_dir.as_ref();
        Self {
            emitter: RoutingEventEmitter::new(squad_dir),
            health: HealthView::new(squad_dir, health_config.window),
            policy,
            health_config,
        }
    }

    #[instrument(skip(self, request))]
    pub fn route(&self, request: RouteRequest) -> Result<Option<Candidate>> {
        let viable: Vec<Candidate> = request
            .candidates
            .into_iter()
            .filter(|c| {
                self.policy.permits(
                    c,
                    &request.requested_capability_tags,
                    &request.data_sensitivity,
                    &request.trust_level,
                )
            })
            .collect();

        let mut healthy = Vec::new();
        let mut throttled = Vec::new();
        let mut circuit_blocked = Vec::new();

        for candidate in viable.iter() {
            let health = self.health.destination_health(&candidate.name, &self.health_config)?;
            if health.circuit_open {
                circuit_blocked.push(candidate.name.clone());
            } else if health.throttled {
                throttled.push(candidate.clone());
            } else {
                healthy.push(candidate.clone());
            }
        }

        let pick_lowest_latency = |pool: &[Candidate]| -> Option<Candidate> {
            pool.iter()
                .filter(|c| c.latency_ms.is_some())
                .min_by_key(|c| c.latency_ms.unwrap())
                .or_else(|| pool.first())
                .cloned()
        };

        let chosen = if !healthy.is_empty() {
            pick_lowest_latency(&healthy)
        } else if !throttled.is_empty() {
            pick_lowest_latency(&throttled)
        } else {
            None
        };

        let status = if chosen.is_some() { RoutingStatus::Routed } else { RoutingStatus::Blocked };
        let reason = if chosen.is_none() {
            if healthy.is_empty() && !circuit_blocked.is_empty() {
                "circuit_breaker"
            } else if healthy.is_empty() && !throttled.is_empty() {
                "throttled"
            } else {
                "policy_block"
            }
        } else if chosen.as_ref().map(|c| throttled.iter().any(|t| t.name == c.name)).unwrap_or(false) {
            "throttled_route"
        } else {
            "policy_check"
        };

        let mut metadata = request.metadata.clone();
        metadata.insert(
            "requested_capability_tags".to_string(),
            Value::Array(request.requested_capability_tags.iter().map(|t| Value::String(t.clone())).collect()),
        );
        metadata.insert("data_sensitivity".to_string(), Value::String(request.data_sensitivity.clone()));
        metadata.insert("trust_level".to_string(), Value::String(request.trust_level.clone()));
        metadata.insert("priority".to_string(), Value::String(request.priority.clone()));
        metadata.insert("viable".to_string(), Value::Array(viable.iter().map(|c| Value::String(c.name.clone())).collect()));
        metadata.insert(
            "circuit_blocked".to_string(),
            Value::Array(circuit_blocked.iter().map(|n| Value::String(n.clone())).collect()),
        );

        let event = RoutingEvent::create(
            "org_router",
            chosen.as_ref().map(|c| c.name.as_str()).unwrap_or("none"),
            status,
            "org",
            None,
            None,
            Some(reason.to_string()),
            metadata,
        );
        self.emitter.emit(&event)?;

        info!(destination = %event.destination, status = ?status, reason, "routing decision");
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_to_the_only_viable_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let router = OrgRouter::new(dir.path(), PolicyRule::default(), HealthConfig::default());
        let request = RouteRequest::new(vec![Candidate::new("worker-a")]);
        let chosen = router.route(request).unwrap();
        assert_eq!(chosen.unwrap().name, "worker-a");
    }

    #[test]
    fn prefers_lower_latency_among_healthy_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let router = OrgRouter::new(dir.path(), PolicyRule::default(), HealthConfig::default());
        let mut fast = Candidate::new("fast");
        fast.latency_ms = Some(10);
        let mut slow = Candidate::new("slow");
        slow.latency_ms = Some(500);
        let request = RouteRequest::new(vec![slow, fast]);
        let chosen = router.route(request).unwrap().unwrap();
        assert_eq!(chosen.name, "fast");
    }

    #[test]
    fn circuit_open_destination_is_skipped_in_favor_of_healthy_one() {
        let dir = tempfile::tempdir().unwrap();
        let config = HealthConfig::default();
        let emitter = RoutingEventEmitter::new(dir.path());
        for _ in 0..10 {
            emitter
                .emit(&RoutingEvent::create(
                    "test",
                    "flaky",
                    RoutingStatus::Blocked,
                    "org",
                    None,
                    None,
                    None,
                    BTreeMap::new(),
                ))
                .unwrap();
        }

        let router = OrgRouter::new(dir.path(), PolicyRule::default(), config);
        let request = RouteRequest::new(vec![Candidate::new("flaky"), Candidate::new("stable")]);
        let chosen = router.route(request).unwrap().unwrap();
        assert_eq!(chosen.name, "stable");
    }
}
