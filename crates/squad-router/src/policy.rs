//! Route candidates and the policy rule that filters them.

/// A routable destination (an agent, a model endpoint) with the attributes
/// a [`PolicyRule`] checks against.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub capability_tags: Vec<String>,
    pub trust_level: String,
    pub data_sensitivity: String,
    pub latency_ms: Option<u64>,
}

impl Candidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capability_tags: Vec::new(),
            trust_level: "low".to_string(),
            data_sensitivity: "public".to_string(),
            latency_ms: None,
        }
    }
}

fn rank_sensitivity(level: &str) -> u8 {
    match level {
        "public" => 0,
        "internal" => 1,
        "confidential" => 2,
        "restricted" => 3,
        _ => 3,
    }
}

/// Org-plane routing policy: capability allow/deny lists, trust gating, and
/// a ceiling on data sensitivity.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub allowed_capability_tags: Vec<String>,
    pub denied_capability_tags: Vec<String>,
    pub required_trust_levels: Vec<String>,
    pub max_data_sensitivity: String,
}

impl Default for PolicyRule {
    fn default() -> Self {
        Self {
            allowed_capability_tags: Vec::new(),
            denied_capability_tags: Vec::new(),
            required_trust_levels: Vec::new(),
            max_data_sensitivity: "confidential".to_string(),
        }
    }
}

impl PolicyRule {
    pub fn permits(&self, candidate: &Candidate, requested_tags: &[String], sensitivity: &str, trust: &str) -> bool {
        if !self.allowed_capability_tags.is_empty() && !requested_tags.iter().any(|t| self.allowed_capability_tags.contains(t)) {
            return false;
        }
        if candidate.capability_tags.iter().any(|t| self.denied_capability_tags.contains(t)) {
            return false;
        }
        if !self.required_trust_levels.is_empty() && !self.required_trust_levels.iter().any(|t| t == trust) {
            return false;
        }
        rank_sensitivity(sensitivity) <= rank_sensitivity(&self.max_data_sensitivity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_capability_tag_blocks_even_without_allow_list() {
        let mut candidate = Candidate::new("worker-a");
        candidate.capability_tags = vec!["shell-exec".to_string()];
        let policy = PolicyRule {
            denied_capability_tags: vec!["shell-exec".to_string()],
            ..Default::default()
        };
        assert!(!policy.permits(&candidate, &[], "public", "low"));
    }

    #[test]
    fn sensitivity_above_ceiling_is_rejected() {
        let candidate = Candidate::new("worker-a");
        let policy = PolicyRule {
            max_data_sensitivity: "internal".to_string(),
            ..Default::default()
        };
        assert!(!policy.permits(&candidate, &[], "confidential", "low"));
        assert!(policy.permits(&candidate, &[], "internal", "low"));
    }
}
