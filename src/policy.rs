//! Data-driven policy evaluator.
//!
//! Grounded on the teacher's `policy.rs::PolicyEngine::evaluate` structure —
//! an ordered cascade of checks, each returning a decision and reason — but
//! widened from a fixed five-step heuristic into rule matching over a
//! loaded, immutable [`McpPolicy`]. Raw (string-pattern) forms are kept
//! separate from the compiled forms so regex compilation happens once, at
//! construction, rather than per call.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::globmatch::{matches_path, matches_tool_name, matches_uri};
use crate::path_guard;

/// `ALLOW < AUDIT < BLOCK`. Declaration order is the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Audit,
    Block,
}

impl Default for Decision {
    fn default() -> Self {
        Decision::Audit
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid tool_name_regex in rule '{id}': {source}")]
    InvalidToolNameRegex { id: String, #[source] source: regex::Error },
    #[error("invalid uri_regex in resource rule '{id}': {source}")]
    InvalidUriRegex { id: String, #[source] source: regex::Error },
}

// ---------------------------------------------------------------------
// Raw (deserializable) policy document shape, as loaded from YAML by the
// config module.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawDefaults {
    #[serde(default)]
    pub decision: Decision,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMatch {
    pub tool_name: Option<String>,
    pub tool_name_regex: Option<String>,
    pub tool_name_any: Option<Vec<String>>,
    #[serde(default)]
    pub argument_patterns: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRule {
    pub id: String,
    #[serde(rename = "match", default)]
    pub match_: RawMatch,
    pub decision: Decision,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawResourceRule {
    pub id: String,
    pub uri_pattern: Option<String>,
    pub uri_regex: Option<String>,
    pub scheme: Option<String>,
    pub decision: Decision,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawValueLimit {
    pub id: String,
    pub tool_pattern: Option<String>,
    pub tool_name_regex: Option<String>,
    pub argument: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub decision: Decision,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPolicy {
    #[serde(default)]
    pub defaults: RawDefaults,
    #[serde(default)]
    pub blocked_tools: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RawRule>,
    #[serde(default)]
    pub blocked_resources: Vec<String>,
    #[serde(default)]
    pub resource_rules: Vec<RawResourceRule>,
    #[serde(default)]
    pub value_limits: Vec<RawValueLimit>,
}

// ---------------------------------------------------------------------
// Compiled policy, used at evaluation time.
// ---------------------------------------------------------------------

#[derive(Debug)]
struct NameMatch {
    tool_name: Option<String>,
    tool_name_regex: Option<Regex>,
    tool_name_any: Option<Vec<String>>,
}

impl NameMatch {
    fn matches(&self, name: &str) -> bool {
        let specified =
            self.tool_name.is_some() || self.tool_name_regex.is_some() || self.tool_name_any.is_some();
        if !specified {
            return true;
        }
        if let Some(pattern) = &self.tool_name {
            if matches_tool_name(name, pattern) {
                return true;
            }
        }
        if let Some(re) = &self.tool_name_regex {
            if re.is_match(name) {
                return true;
            }
        }
        if let Some(list) = &self.tool_name_any {
            if list.iter().any(|n| n == name) {
                return true;
            }
        }
        false
    }
}

#[derive(Debug)]
struct Rule {
    id: String,
    name_match: NameMatch,
    argument_patterns: HashMap<String, String>,
    decision: Decision,
    reason: String,
}

impl Rule {
    fn matches(&self, name: &str, arguments: &Value) -> bool {
        if !self.name_match.matches(name) {
            return false;
        }
        self.argument_patterns.iter().all(|(arg, pattern)| {
            arguments
                .get(arg)
                .map(|v| matches_path(&stringify(v), pattern))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug)]
struct ResourceRule {
    id: String,
    uri_pattern: Option<String>,
    uri_regex: Option<Regex>,
    scheme: Option<String>,
    decision: Decision,
    reason: String,
}

impl ResourceRule {
    fn matches(&self, uri: &str) -> bool {
        let specified = self.uri_pattern.is_some() || self.uri_regex.is_some() || self.scheme.is_some();
        if !specified {
            return true;
        }
        if let Some(pattern) = &self.uri_pattern {
            if matches_uri(uri, pattern) {
                return true;
            }
        }
        if let Some(re) = &self.uri_regex {
            if re.is_match(uri) {
                return true;
            }
        }
        if let Some(scheme) = &self.scheme {
            if uri.split("://").next() == Some(scheme.as_str()) {
                return true;
            }
        }
        false
    }
}

#[derive(Debug)]
struct ValueLimitRule {
    id: String,
    tool_pattern: Option<String>,
    tool_name_regex: Option<Regex>,
    argument: String,
    min: Option<f64>,
    max: Option<f64>,
    decision: Decision,
    reason: String,
}

impl ValueLimitRule {
    fn tool_matches(&self, name: &str) -> bool {
        if self.tool_pattern.is_none() && self.tool_name_regex.is_none() {
            return true;
        }
        if let Some(pattern) = &self.tool_pattern {
            if matches_tool_name(name, pattern) {
                return true;
            }
        }
        if let Some(re) = &self.tool_name_regex {
            if re.is_match(name) {
                return true;
            }
        }
        false
    }
}

/// An immutable, pre-compiled policy. Construct once per proxy instance
/// via [`McpPolicy::compile`] and share freely across relay tasks.
#[derive(Debug)]
pub struct McpPolicy {
    defaults_decision: Decision,
    blocked_tools: Vec<String>,
    rules: Vec<Rule>,
    blocked_resources: Vec<String>,
    resource_rules: Vec<ResourceRule>,
    value_limits: Vec<ValueLimitRule>,
}

#[derive(Debug, Clone, Default)]
pub struct Verdict {
    pub decision: Decision,
    pub triggered_rules: Vec<String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ValueLimitFinding {
    pub id: String,
    pub decision: Decision,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValueLimitResult {
    pub blocked: bool,
    pub findings: Vec<ValueLimitFinding>,
}

impl McpPolicy {
    /// Compile a [`RawPolicy`] (as produced by YAML loading and pack
    /// merging) into an evaluator, pre-compiling every regex field.
    pub fn compile(raw: RawPolicy) -> Result<Self, PolicyError> {
        let rules = raw
            .rules
            .into_iter()
            .map(|r| {
                let tool_name_regex = r
                    .match_
                    .tool_name_regex
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|source| PolicyError::InvalidToolNameRegex {
                        id: r.id.clone(),
                        source,
                    })?;
                Ok(Rule {
                    id: r.id,
                    name_match: NameMatch {
                        tool_name: r.match_.tool_name,
                        tool_name_regex,
                        tool_name_any: r.match_.tool_name_any,
                    },
                    argument_patterns: r.match_.argument_patterns,
                    decision: r.decision,
                    reason: r.reason,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        let resource_rules = raw
            .resource_rules
            .into_iter()
            .map(|r| {
                let uri_regex = r
                    .uri_regex
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|source| PolicyError::InvalidUriRegex {
                        id: r.id.clone(),
                        source,
                    })?;
                Ok(ResourceRule {
                    id: r.id,
                    uri_pattern: r.uri_pattern,
                    uri_regex,
                    scheme: r.scheme,
                    decision: r.decision,
                    reason: r.reason,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        let value_limits = raw
            .value_limits
            .into_iter()
            .map(|r| {
                let tool_name_regex = r
                    .tool_name_regex
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|source| PolicyError::InvalidToolNameRegex {
                        id: r.id.clone(),
                        source,
                    })?;
                Ok(ValueLimitRule {
                    id: r.id,
                    tool_pattern: r.tool_pattern,
                    tool_name_regex,
                    argument: r.argument,
                    min: r.min,
                    max: r.max,
                    decision: r.decision,
                    reason: r.reason,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;

        Ok(McpPolicy {
            defaults_decision: raw.defaults.decision,
            blocked_tools: raw.blocked_tools,
            rules,
            blocked_resources: raw.blocked_resources,
            resource_rules,
            value_limits,
        })
    }

    /// An empty, permissive policy — every call falls through to AUDIT.
    pub fn empty() -> Self {
        McpPolicy::compile(RawPolicy::default()).expect("empty policy always compiles")
    }

    pub fn evaluate_tool_call(&self, name: &str, arguments: &Value) -> Verdict {
        for pattern in &self.blocked_tools {
            if matches_tool_name(name, pattern) {
                return Verdict {
                    decision: Decision::Block,
                    triggered_rules: vec![format!("blocked-tool:{pattern}")],
                    reasons: vec![format!(
                        "tool '{name}' matches blocked tools list pattern '{pattern}'"
                    )],
                };
            }
        }

        let mut best: Option<Decision> = None;
        let mut triggered = Vec::new();
        let mut reasons = Vec::new();
        for rule in &self.rules {
            if !rule.matches(name, arguments) {
                continue;
            }
            match best {
                Some(current) if current > rule.decision => {}
                Some(current) if current == rule.decision => {
                    triggered.push(rule.id.clone());
                    reasons.push(rule.reason.clone());
                }
                _ => {
                    best = Some(rule.decision);
                    triggered = vec![rule.id.clone()];
                    reasons = vec![rule.reason.clone()];
                }
            }
        }

        match best {
            Some(decision) => Verdict {
                decision,
                triggered_rules: triggered,
                reasons,
            },
            None => Verdict {
                decision: self.defaults_decision,
                triggered_rules: Vec::new(),
                reasons: Vec::new(),
            },
        }
    }

    pub fn evaluate_resource_read(&self, uri: &str) -> Verdict {
        for pattern in &self.blocked_resources {
            if matches_uri(uri, pattern) {
                let verdict = Verdict {
                    decision: Decision::Block,
                    triggered_rules: vec![format!("blocked-resource:{pattern}")],
                    reasons: vec![format!(
                        "resource '{uri}' matches blocked resources list pattern '{pattern}'"
                    )],
                };
                return self.escalate_for_file(uri, verdict);
            }
        }

        let mut best: Option<Decision> = None;
        let mut triggered = Vec::new();
        let mut reasons = Vec::new();
        for rule in &self.resource_rules {
            if !rule.matches(uri) {
                continue;
            }
            match best {
                Some(current) if current > rule.decision => {}
                Some(current) if current == rule.decision => {
                    triggered.push(rule.id.clone());
                    reasons.push(rule.reason.clone());
                }
                _ => {
                    best = Some(rule.decision);
                    triggered = vec![rule.id.clone()];
                    reasons = vec![rule.reason.clone()];
                }
            }
        }

        let verdict = match best {
            Some(decision) => Verdict {
                decision,
                triggered_rules: triggered,
                reasons,
            },
            None => Verdict {
                decision: self.defaults_decision,
                triggered_rules: Vec::new(),
                reasons: Vec::new(),
            },
        };
        self.escalate_for_file(uri, verdict)
    }

    fn escalate_for_file(&self, uri: &str, mut verdict: Verdict) -> Verdict {
        let Some(path) = uri.strip_prefix("file://") else {
            return verdict;
        };
        let guard = path_guard::check("resources/read", &serde_json::json!({ "uri": path }));
        if guard.blocked {
            verdict.decision = Decision::Block;
            verdict.triggered_rules.push("config-file-guard".to_string());
            verdict.reasons.push(format!(
                "resource path '{path}' matches a protected configuration file"
            ));
        }
        verdict
    }

    pub fn check_value_limits(&self, name: &str, arguments: &Value) -> ValueLimitResult {
        let mut findings = Vec::new();
        for rule in &self.value_limits {
            if !rule.tool_matches(name) {
                continue;
            }
            let Some(value) = arguments.get(&rule.argument).and_then(extract_number) else {
                continue;
            };
            let mut breached = false;
            if let Some(max) = rule.max {
                if value > max {
                    breached = true;
                }
            }
            if let Some(min) = rule.min {
                if value < min {
                    breached = true;
                }
            }
            if breached {
                findings.push(ValueLimitFinding {
                    id: rule.id.clone(),
                    decision: rule.decision,
                    reason: rule.reason.clone(),
                });
            }
        }
        let blocked = findings.iter().any(|f| f.decision == Decision::Block);
        ValueLimitResult { blocked, findings }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn extract_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy_from_yaml(yaml: &str) -> McpPolicy {
        let raw: RawPolicy = serde_yaml::from_str(yaml).unwrap();
        McpPolicy::compile(raw).unwrap()
    }

    #[test]
    fn blocked_tool_short_circuits() {
        let policy = policy_from_yaml(
            r#"
blocked_tools: ["execute_command"]
"#,
        );
        let verdict = policy.evaluate_tool_call("execute_command", &json!({"command": "rm -rf /"}));
        assert_eq!(verdict.decision, Decision::Block);
        assert!(verdict.triggered_rules[0].starts_with("blocked-tool:"));
        assert!(verdict.reasons[0].contains("blocked tools list"));
    }

    #[test]
    fn rule_match_blocks_protected_path_argument() {
        let policy = policy_from_yaml(
            r#"
rules:
  - id: no-etc-writes
    match:
      tool_name: write_file
      argument_patterns:
        path: "/etc/**"
    decision: BLOCK
    reason: "writes under /etc are blocked"
"#,
        );
        let blocked = policy.evaluate_tool_call("write_file", &json!({"path": "/etc/passwd"}));
        assert_eq!(blocked.decision, Decision::Block);

        let allowed = policy.evaluate_tool_call("write_file", &json!({"path": "/tmp/safe"}));
        assert_eq!(allowed.decision, Decision::Audit);
    }

    #[test]
    fn default_decision_is_used_when_nothing_matches() {
        let policy = policy_from_yaml("defaults:\n  decision: ALLOW\n");
        let verdict = policy.evaluate_tool_call("anything", &json!({}));
        assert_eq!(verdict.decision, Decision::Allow);
        assert!(verdict.triggered_rules.is_empty());
    }

    #[test]
    fn value_limit_boundary_is_strict() {
        let policy = policy_from_yaml(
            r#"
value_limits:
  - id: amount-cap
    tool_name_regex: "send_.*"
    argument: amount
    max: 100
    decision: BLOCK
    reason: "amount too large"
"#,
        );
        let at_limit = policy.check_value_limits("send_tokens", &json!({"amount": 100}));
        assert!(!at_limit.blocked);

        let over_limit = policy.check_value_limits("send_tokens", &json!({"amount": 100.01}));
        assert!(over_limit.blocked);

        let far_over = policy.check_value_limits("send_tokens", &json!({"amount": 52_000_000}));
        assert!(far_over.blocked);
    }

    #[test]
    fn value_limit_min_only_allows_negative_infinity_equivalent() {
        let policy = policy_from_yaml(
            r#"
value_limits:
  - id: amount-cap
    argument: amount
    max: 100
    decision: BLOCK
    reason: "too large"
"#,
        );
        let very_negative = policy.check_value_limits("t", &json!({"amount": -1_000_000_000.0}));
        assert!(!very_negative.blocked);
    }

    #[test]
    fn file_uri_escalation_does_not_panic_without_home() {
        let policy = policy_from_yaml("defaults:\n  decision: ALLOW\n");
        let verdict = policy.evaluate_resource_read("file:///home/alice/.ssh/config");
        assert!(verdict.decision == Decision::Allow || verdict.decision == Decision::Block);
    }

    #[test]
    fn blocked_resource_short_circuits() {
        let policy = policy_from_yaml(
            r#"
blocked_resources: ["file:///etc/**"]
"#,
        );
        let verdict = policy.evaluate_resource_read("file:///etc/shadow");
        assert_eq!(verdict.decision, Decision::Block);
    }

    #[test]
    fn adding_a_rule_never_weakens_the_decision() {
        let before = policy_from_yaml("defaults:\n  decision: AUDIT\n");
        let before_verdict = before.evaluate_tool_call("write_file", &json!({"path": "/etc/passwd"}));

        let after = policy_from_yaml(
            r#"
defaults:
  decision: AUDIT
rules:
  - id: no-etc-writes
    match:
      argument_patterns:
        path: "/etc/**"
    decision: BLOCK
    reason: "blocked"
"#,
        );
        let after_verdict = after.evaluate_tool_call("write_file", &json!({"path": "/etc/passwd"}));
        assert!(after_verdict.decision >= before_verdict.decision);
    }

    #[test]
    fn empty_policy_allows_everything_through_default_audit() {
        let policy = McpPolicy::empty();
        let verdict = policy.evaluate_tool_call("anything", &json!({}));
        assert_eq!(verdict.decision, Decision::Audit);
    }
}
