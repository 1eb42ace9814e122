//! Policy-file loading: reads the base policy document plus any number of
//! "pack" files and merges them into one [`RawPolicy`] for [`crate::policy::McpPolicy::compile`].
//!
//! Grounded on the teacher's `config.rs::NodeConfig` loader idiom
//! (load-from-path plus a `json_schema()` helper), widened from a single
//! self-contained document into base+pack union merging.

use std::path::Path;

use thiserror::Error;

use crate::policy::RawPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse policy file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Load a base policy file and merge zero or more pack files into it.
///
/// Pack files whose base file name starts with `_` are treated as
/// disabled and skipped entirely. `blocked_tools`/`blocked_resources`
/// union into the base (duplicates dropped); `rules`/`resource_rules`/
/// `value_limits` append in pack order.
pub fn load_policy<P: AsRef<Path>>(base_path: P, pack_paths: &[P]) -> Result<RawPolicy, ConfigError> {
    let mut policy = load_raw(base_path.as_ref())?;
    for pack_path in pack_paths {
        let pack_path = pack_path.as_ref();
        if is_disabled(pack_path) {
            continue;
        }
        let pack = load_raw(pack_path)?;
        merge_pack(&mut policy, pack);
    }
    Ok(policy)
}

fn is_disabled(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('_'))
        .unwrap_or(false)
}

fn load_raw(path: &Path) -> Result<RawPolicy, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn merge_pack(base: &mut RawPolicy, pack: RawPolicy) {
    for tool in pack.blocked_tools {
        if !base.blocked_tools.contains(&tool) {
            base.blocked_tools.push(tool);
        }
    }
    for resource in pack.blocked_resources {
        if !base.blocked_resources.contains(&resource) {
            base.blocked_resources.push(resource);
        }
    }
    base.rules.extend(pack.rules);
    base.resource_rules.extend(pack.resource_rules);
    base.value_limits.extend(pack.value_limits);
}

/// A JSON Schema describing the policy-file document shape, for `policy
/// schema` / editor tooling.
pub fn policy_schema() -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "AgentShield MCP Policy",
        "type": "object",
        "properties": {
            "defaults": {
                "type": "object",
                "properties": {
                    "decision": {"type": "string", "enum": ["ALLOW", "AUDIT", "BLOCK"], "default": "AUDIT"}
                }
            },
            "blocked_tools": {"type": "array", "items": {"type": "string"}},
            "rules": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "decision", "reason"],
                    "properties": {
                        "id": {"type": "string"},
                        "match": {
                            "type": "object",
                            "properties": {
                                "tool_name": {"type": "string"},
                                "tool_name_regex": {"type": "string"},
                                "tool_name_any": {"type": "array", "items": {"type": "string"}},
                                "argument_patterns": {"type": "object", "additionalProperties": {"type": "string"}}
                            }
                        },
                        "decision": {"type": "string", "enum": ["ALLOW", "AUDIT", "BLOCK"]},
                        "reason": {"type": "string"}
                    }
                }
            },
            "blocked_resources": {"type": "array", "items": {"type": "string"}},
            "resource_rules": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "decision", "reason"],
                    "properties": {
                        "id": {"type": "string"},
                        "uri_pattern": {"type": "string"},
                        "uri_regex": {"type": "string"},
                        "scheme": {"type": "string"},
                        "decision": {"type": "string", "enum": ["ALLOW", "AUDIT", "BLOCK"]},
                        "reason": {"type": "string"}
                    }
                }
            },
            "value_limits": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["id", "argument", "decision", "reason"],
                    "properties": {
                        "id": {"type": "string"},
                        "tool_pattern": {"type": "string"},
                        "tool_name_regex": {"type": "string"},
                        "argument": {"type": "string"},
                        "min": {"type": "number"},
                        "max": {"type": "number"},
                        "decision": {"type": "string", "enum": ["ALLOW", "AUDIT", "BLOCK"]},
                        "reason": {"type": "string"}
                    }
                }
            }
        }
    }))
    .unwrap()
}
