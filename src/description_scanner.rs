//! Tool-description poisoning scanner.
//!
//! Scans a tool's advertised description and input schema for markers of
//! prompt-injection-style poisoning: hidden instructions aimed at the
//! agent, credential-harvesting hints, exfiltration intent, instructions
//! to override other tools, or instructions to conceal behavior from the
//! user. Grounded on the same regex-battery idiom as
//! `content_scanner` (itself grounded on `security.rs::scrub_credentials`),
//! applied to tool metadata instead of call arguments.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const CONTEXT_RADIUS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub signal: &'static str,
    pub detail: String,
    pub context: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub poisoned: bool,
    pub findings: Vec<Finding>,
}

/// Scan a tool definition's `description` and `input_schema` for poisoning
/// signals. `input_schema` is serialized to text for scanning; its shape is
/// not otherwise interpreted.
pub fn scan(description: &str, input_schema: &Value) -> ScanResult {
    let schema_text = input_schema.to_string();
    let combined = format!("{description} {schema_text}").to_lowercase();

    let mut findings = Vec::new();
    for family in FAMILIES {
        for m in family.regex().find_iter(&combined) {
            findings.push(Finding {
                signal: family.signal,
                detail: family.detail.to_string(),
                context: context_snippet(&combined, m.start(), m.end()),
            });
        }
    }

    ScanResult {
        poisoned: !findings.is_empty(),
        findings,
    }
}

fn context_snippet(text: &str, start: usize, end: usize) -> String {
    let lo = start.saturating_sub(CONTEXT_RADIUS);
    let hi = (end + CONTEXT_RADIUS).min(text.len());
    let lo = floor_char_boundary(text, lo);
    let hi = ceil_char_boundary(text, hi);
    let mut snippet = text[lo..hi].to_string();
    if snippet.len() > 80 {
        snippet.truncate(80);
    }
    snippet
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

struct Family {
    signal: &'static str,
    detail: &'static str,
    pattern: &'static str,
    re: OnceLock<Regex>,
}

impl Family {
    fn regex(&self) -> &Regex {
        self.re.get_or_init(|| Regex::new(self.pattern).unwrap())
    }
}

static FAMILIES: &[Family] = &[
    Family {
        signal: "hidden_instructions",
        detail: "hidden instruction tag or override phrase embedded in tool metadata",
        pattern: r"(?i)(<important>|<system>|<instruction>|<cmd>|ignore (all )?previous instructions|override (previous|system)|you must first read|before using this tool.{0,40}read|otherwise the tool will not work)",
        re: OnceLock::new(),
    },
    Family {
        signal: "credential_harvest",
        detail: "reference to credential material or credential files",
        pattern: r"(?i)(~/\.ssh|~/\.aws|~/\.gnupg|~/\.kube|~/\.config/gcloud|id_rsa|authorized_keys|mcp\.json|\.env|/etc/passwd|/etc/shadow|credentials|access key|secret key|api key|api token|bearer token)",
        re: OnceLock::new(),
    },
    Family {
        signal: "exfiltration_intent",
        detail: "instruction suggesting the agent send or encode data for exfiltration",
        pattern: r"(?i)(pass (it|them) as|send (it|them) to|curl\s|wget\s|fetch\(|encode.{0,20}as (base64|hex)|(include|embed|attach) it in the (response|argument))",
        re: OnceLock::new(),
    },
    Family {
        signal: "cross_tool_override",
        detail: "instruction attempting to override behavior of another tool",
        pattern: r"(?i)(side effect on the also-present|when this tool is available.{0,40}must|mcp_tool_\w+ must|send all (emails|messages|requests|data) to)",
        re: OnceLock::new(),
    },
    Family {
        signal: "stealth_instruction",
        detail: "instruction to conceal behavior from the user",
        pattern: r"(?i)(do not (mention|tell|inform|reveal|show)|will (upset|scare|confuse) the user|implementation detail|just a technical requirement|very very important|the application will crash|all data will be lost)",
        re: OnceLock::new(),
    },
];
