//! Config-path guard: flags argument paths that point at protected
//! configuration files regardless of how the path is spelled (tilde form,
//! expanded form, or with `..` traversal in between).
//!
//! Grounded on the teacher's `sandbox.rs::has_traversal` /
//! `is_within_allowed_paths` idiom, generalized from an allow-list sandbox
//! check into a protected-deny-list keyed by glob pattern and category.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::globmatch::matches_path;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: String,
    pub category: &'static str,
    pub pattern: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct GuardResult {
    pub blocked: bool,
    pub findings: Vec<Finding>,
}

/// `(category, tilde-form glob pattern)`.
const PROTECTED_PATHS: &[(&str, &str)] = &[
    ("agentshield-config", "~/.agentshield/**"),
    ("ide-mcp-config", "~/.cursor/mcp.json"),
    (
        "ide-mcp-config",
        "~/Library/Application Support/Claude/claude_desktop_config.json",
    ),
    ("ide-hooks", "~/.cursor/hooks.json"),
    ("ide-hooks", "~/.codeium/windsurf/hooks.json"),
    ("shell-config", "~/.bashrc"),
    ("shell-config", "~/.zshrc"),
    ("shell-config", "~/.zprofile"),
    ("shell-config", "~/.bash_profile"),
    ("shell-config", "~/.profile"),
    ("package-config", "~/.npmrc"),
    ("package-config", "~/.yarnrc.yml"),
    ("package-config", "~/.bunfig.toml"),
    ("package-config", "~/.pypirc"),
    ("package-config", "~/.config/pip/pip.conf"),
    ("git-config", "~/.gitconfig"),
    ("git-config", "~/.config/git/config"),
    ("ssh-config", "~/.ssh/config"),
    ("kube-config", "~/.kube/config"),
    ("docker-config", "~/.docker/config.json"),
];

/// Recursively extract path-like arguments and check them against the
/// protected-path table. Matches the pre-expansion tilde form and the
/// fully expanded, traversal-resolved absolute form.
pub fn check(_tool_name: &str, arguments: &Value) -> GuardResult {
    check_with_home(arguments, dirs::home_dir())
}

fn check_with_home(arguments: &Value, home: Option<PathBuf>) -> GuardResult {
    let mut candidates = Vec::new();
    if let Some(obj) = arguments.as_object() {
        for v in obj.values() {
            collect_path_like(v, &mut candidates, 0);
        }
    }

    let mut findings = Vec::new();
    let mut seen: HashSet<(String, &'static str)> = HashSet::new();

    for candidate in candidates {
        let resolved = resolve(&candidate, home.as_deref());
        for &(category, pattern) in PROTECTED_PATHS {
            let expanded_pattern = expand_tilde(pattern, home.as_deref());
            let hit = matches_path(&candidate, pattern) || matches_path(&resolved, &expanded_pattern);
            if hit && seen.insert((candidate.clone(), category)) {
                findings.push(Finding {
                    path: candidate.clone(),
                    category,
                    pattern,
                });
            }
        }
    }

    GuardResult {
        blocked: !findings.is_empty(),
        findings,
    }
}

fn collect_path_like(value: &Value, out: &mut Vec<String>, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::String(s) => {
            if s.contains('/') || s.starts_with('~') {
                out.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_path_like(item, out, depth + 1);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_path_like(v, out, depth + 1);
            }
        }
        _ => {}
    }
}

fn expand_tilde(path: &str, home: Option<&Path>) -> String {
    let Some(home) = home else {
        return path.to_string();
    };
    if path == "~" {
        return home.display().to_string();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("{}/{}", home.display(), rest);
    }
    path.to_string()
}

/// Collapse `.` and `..` segments. Does not consult the filesystem —
/// purely lexical, matching the teacher's traversal check which only
/// looks for `..` components rather than resolving symlinks.
fn normalize_dots(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    let joined = stack.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

fn resolve(path: &str, home: Option<&Path>) -> String {
    normalize_dots(&expand_tilde(path, home))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn home() -> PathBuf {
        PathBuf::from("/Users/dev")
    }

    #[test]
    fn no_path_like_arguments_never_blocks() {
        let result = check_with_home(&json!({"count": 3, "label": "ok"}), Some(home()));
        assert!(!result.blocked);
    }

    #[test]
    fn tilde_form_matches_directly() {
        let result = check_with_home(&json!({"path": "~/.bashrc"}), Some(home()));
        assert!(result.blocked);
        assert_eq!(result.findings[0].category, "shell-config");
    }

    #[test]
    fn expanded_absolute_form_matches() {
        let result = check_with_home(&json!({"path": "/Users/dev/.bashrc"}), Some(home()));
        assert!(result.blocked);
    }

    #[test]
    fn traversal_resolves_and_still_matches() {
        let result = check_with_home(&json!({"path": "/Users/dev/x/../.bashrc"}), Some(home()));
        assert!(result.blocked);
    }

    #[test]
    fn project_nested_path_does_not_match() {
        let result = check_with_home(
            &json!({"path": "/Users/dev/myproject/.bashrc"}),
            Some(home()),
        );
        assert!(!result.blocked);
    }

    #[test]
    fn agentshield_config_double_star_matches_nested() {
        let result = check_with_home(
            &json!({"path": "~/.agentshield/policy/base.yaml"}),
            Some(home()),
        );
        assert!(result.blocked);
        assert_eq!(result.findings[0].category, "agentshield-config");
    }

    #[test]
    fn ssh_config_matches() {
        let result = check_with_home(&json!({"path": "~/.ssh/config"}), Some(home()));
        assert!(result.blocked);
        assert_eq!(result.findings[0].category, "ssh-config");
    }

    #[test]
    fn unrelated_path_does_not_match() {
        let result = check_with_home(&json!({"path": "/tmp/scratch/output.txt"}), Some(home()));
        assert!(!result.blocked);
    }

    #[test]
    fn nested_argument_path_found() {
        let result = check_with_home(
            &json!({"options": {"target": "~/.gitconfig"}}),
            Some(home()),
        );
        assert!(result.blocked);
        assert_eq!(result.findings[0].category, "git-config");
    }

    #[test]
    fn no_home_directory_falls_back_to_tilde_form_only() {
        let result = check_with_home(&json!({"path": "~/.bashrc"}), None);
        assert!(result.blocked);
    }
}
