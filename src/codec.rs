//! JSON-RPC 2.0 message codec.
//!
//! Parses and classifies the envelopes that flow between an MCP client and
//! server, preserving the `id` field as raw, undecoded JSON text so a block
//! response can splice it back in without a decode/re-encode round trip
//! (numeric vs string ids must round-trip exactly).

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;

/// What a parsed [`Message`] turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    ToolsCall,
    ToolsList,
    ResourcesRead,
    OtherRequest,
    Notification,
    Response,
    Unknown,
}

/// A decoded JSON-RPC 2.0 envelope.
///
/// `result`/`error` are kept as raw JSON text and only decoded by callers
/// that actually need them (the `tools/list` response filter).
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Raw JSON text of the `id` field, e.g. `"1"`, `"\"abc-123\""`, `"null"`.
    /// `None` means the field was absent (a notification).
    pub id: Option<String>,
    pub method: Option<String>,
    pub params: Option<Value>,
    pub result: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("not a tools/call request")]
    NotAToolCall,
    #[error("missing required parameter: name")]
    MissingName,
    #[error("not a resources/read request")]
    NotAResourceRead,
    #[error("missing required parameter: uri")]
    MissingUri,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(default)]
    #[allow(dead_code)]
    jsonrpc: Option<&'a str>,
    #[serde(borrow, default)]
    id: Option<&'a RawValue>,
    #[serde(default)]
    method: Option<&'a str>,
    #[serde(borrow, default)]
    params: Option<&'a RawValue>,
    #[serde(borrow, default)]
    result: Option<&'a RawValue>,
    #[serde(borrow, default)]
    error: Option<&'a RawValue>,
}

/// Parse a single JSON-RPC line/body and classify it.
///
/// Invalid JSON returns `Kind::Unknown` wrapped in `Err` — the caller
/// decides whether to forward the bytes verbatim (fail open for liveness).
pub fn parse(bytes: &str) -> Result<(Message, Kind), MessageError> {
    let envelope: Envelope = serde_json::from_str(bytes)?;

    let params = match envelope.params {
        Some(raw) => Some(serde_json::from_str(raw.get())?),
        None => None,
    };

    let message = Message {
        id: envelope.id.map(|raw| raw.get().to_string()),
        method: envelope.method.map(|m| m.to_string()),
        params,
        result: envelope.result.map(|raw| raw.get().to_string()),
        error: envelope.error.map(|raw| raw.get().to_string()),
    };

    let kind = classify(&message);
    Ok((message, kind))
}

/// Classify an already-decoded message.
pub fn classify(message: &Message) -> Kind {
    match (&message.method, &message.id) {
        (Some(method), Some(_)) => match method.as_str() {
            "tools/call" => Kind::ToolsCall,
            "tools/list" => Kind::ToolsList,
            "resources/read" => Kind::ResourcesRead,
            _ => Kind::OtherRequest,
        },
        (Some(_), None) => Kind::Notification,
        (None, Some(_)) => Kind::Response,
        (None, None) => Kind::Unknown,
    }
}

/// Extract `{name, arguments}` from a `tools/call` message's params.
pub fn extract_tool_call(message: &Message) -> Result<(String, Value), MessageError> {
    if message.method.as_deref() != Some("tools/call") {
        return Err(MessageError::NotAToolCall);
    }
    let params = message.params.as_ref().ok_or(MessageError::MissingName)?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(MessageError::MissingName)?
        .to_string();
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    Ok((name, arguments))
}

/// Extract the `uri` from a `resources/read` message's params.
pub fn extract_resource_read(message: &Message) -> Result<String, MessageError> {
    if message.method.as_deref() != Some("resources/read") {
        return Err(MessageError::NotAResourceRead);
    }
    let params = message.params.as_ref().ok_or(MessageError::MissingUri)?;
    let uri = params
        .get("uri")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(MessageError::MissingUri)?
        .to_string();
    Ok(uri)
}

/// Build a JSON-RPC error response for a blocked message.
///
/// `id_raw` is the raw JSON text previously captured on [`Message::id`];
/// it is spliced in verbatim so the client's original id form (number,
/// string, or null) round-trips exactly. Error code is fixed at `-32600`
/// (Invalid Request) per the wire contract.
pub fn build_block_response(id_raw: Option<&str>, reason: &str) -> String {
    let id_part = id_raw.unwrap_or("null");
    let message = format!("Blocked by AgentShield: {reason}");
    let message_json =
        serde_json::to_string(&message).unwrap_or_else(|_| "\"Blocked by AgentShield\"".into());
    format!(
        r#"{{"jsonrpc":"2.0","id":{id_part},"error":{{"code":-32600,"message":{message_json}}}}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tools_call() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{}}}"#;
        let (msg, kind) = parse(line).unwrap();
        assert_eq!(kind, Kind::ToolsCall);
        assert_eq!(msg.id.as_deref(), Some("1"));
    }

    #[test]
    fn classifies_tools_list() {
        let line = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        let (_, kind) = parse(line).unwrap();
        assert_eq!(kind, Kind::ToolsList);
    }

    #[test]
    fn classifies_resources_read() {
        let line = r#"{"jsonrpc":"2.0","id":3,"method":"resources/read","params":{"uri":"file:///etc/passwd"}}"#;
        let (_, kind) = parse(line).unwrap();
        assert_eq!(kind, Kind::ResourcesRead);
    }

    #[test]
    fn classifies_other_request() {
        let line = r#"{"jsonrpc":"2.0","id":4,"method":"initialize","params":{}}"#;
        let (_, kind) = parse(line).unwrap();
        assert_eq!(kind, Kind::OtherRequest);
    }

    #[test]
    fn classifies_notification() {
        let line = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let (_, kind) = parse(line).unwrap();
        assert_eq!(kind, Kind::Notification);
    }

    #[test]
    fn classifies_response() {
        let line = r#"{"jsonrpc":"2.0","id":5,"result":{"ok":true}}"#;
        let (_, kind) = parse(line).unwrap();
        assert_eq!(kind, Kind::Response);
    }

    #[test]
    fn parse_error_on_malformed_json() {
        assert!(parse("not json").is_err());
    }

    #[test]
    fn string_id_round_trips_raw() {
        let line = r#"{"jsonrpc":"2.0","id":"abc-123","method":"initialize"}"#;
        let (msg, _) = parse(line).unwrap();
        assert_eq!(msg.id.as_deref(), Some("\"abc-123\""));
    }

    #[test]
    fn null_id_is_preserved() {
        let line = r#"{"jsonrpc":"2.0","id":null,"method":"initialize"}"#;
        let (msg, _) = parse(line).unwrap();
        assert_eq!(msg.id.as_deref(), Some("null"));
    }

    #[test]
    fn extract_tool_call_reads_name_and_arguments() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"write_file","arguments":{"path":"/tmp/x"}}}"#;
        let (msg, _) = parse(line).unwrap();
        let (name, args) = extract_tool_call(&msg).unwrap();
        assert_eq!(name, "write_file");
        assert_eq!(args["path"], "/tmp/x");
    }

    #[test]
    fn extract_tool_call_missing_name_is_error() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{}}"#;
        let (msg, _) = parse(line).unwrap();
        assert!(matches!(
            extract_tool_call(&msg),
            Err(MessageError::MissingName)
        ));
    }

    #[test]
    fn extract_tool_call_missing_arguments_defaults_empty() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo"}}"#;
        let (msg, _) = parse(line).unwrap();
        let (name, args) = extract_tool_call(&msg).unwrap();
        assert_eq!(name, "echo");
        assert!(args.as_object().unwrap().is_empty());
    }

    #[test]
    fn extract_resource_read_reads_uri() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"file:///tmp/x"}}"#;
        let (msg, _) = parse(line).unwrap();
        assert_eq!(extract_resource_read(&msg).unwrap(), "file:///tmp/x");
    }

    #[test]
    fn build_block_response_preserves_numeric_id() {
        let resp = build_block_response(Some("1"), "tool blocked");
        let v: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(v["id"], 1);
        assert_eq!(v["error"]["code"], -32600);
        assert!(v["error"]["message"]
            .as_str()
            .unwrap()
            .contains("AgentShield"));
    }

    #[test]
    fn build_block_response_preserves_string_id() {
        let resp = build_block_response(Some("\"abc-123\""), "blocked");
        let v: Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(v["id"], "abc-123");
    }

    #[test]
    fn build_block_response_escapes_reason() {
        let resp = build_block_response(Some("1"), "contains \"quotes\"");
        let v: Value = serde_json::from_str(&resp).unwrap();
        assert!(v["error"]["message"].as_str().unwrap().contains("quotes"));
    }

    #[test]
    fn build_block_response_defaults_null_id() {
        let resp = build_block_response(None, "blocked");
        let v: Value = serde_json::from_str(&resp).unwrap();
        assert!(v["id"].is_null());
    }
}
