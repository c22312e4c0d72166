use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stratum method types
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StratumMethod {
    Subscribe,
    Authorize,
    Submit,
    SetDifficulty,
    Notify,
    Other(String),
}

impl From<&str> for StratumMethod {
    fn from(s: &str) -> Self {
        match s {
            "mining.subscribe" => StratumMethod::Subscribe,
            "mining.authorize" => StratumMethod::Authorize,
            "mining.submit" => StratumMethod::Submit,
            "mining.set_difficulty" => StratumMethod::SetDifficulty,
            "mining.notify" => StratumMethod::Notify,
            other => StratumMethod::Other(other.to_string()),
        }
    }
}

impl StratumMethod {
    pub fn as_str(&self) -> &str {
        match self {
            StratumMethod::Subscribe => "mining.subscribe",
            StratumMethod::Authorize => "mining.authorize",
            StratumMethod::Submit => "mining.submit",
            StratumMethod::SetDifficulty => "mining.set_difficulty",
            StratumMethod::Notify => "mining.notify",
            StratumMethod::Other(s) => s,
        }
    }
}

/// JSON-RPC event (request from client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcEvent {
    /// ID can be null, string, or number
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl JsonRpcEvent {
    pub fn method_enum(&self) -> StratumMethod {
        StratumMethod::from(self.method.as_str())
    }

    /// String parameter at `idx`, if present
    pub fn str_param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).and_then(|v| v.as_str())
    }
}

/// JSON-RPC response (to client). All three fields are always written,
/// so an accepted call reads `{"id":1,"result":true,"error":null}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<Vec<Value>>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn error(id: Option<Value>, code: i32, message: &str, data: Option<Value>) -> Self {
        let error_vec = vec![Value::Number(code.into()), Value::String(message.to_string()), data.unwrap_or(Value::Null)];
        Self { id, result: None, error: Some(error_vec) }
    }

    /// Rejected submission: `result` is `false` and the error carries the reason
    pub fn reject(id: Option<Value>, code: i32, message: &str) -> Self {
        Self { result: Some(Value::Bool(false)), ..Self::error(id, code, message, None) }
    }
}

/// Server-initiated notification, written with an explicit `"id": null`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub id: Option<Value>,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: StratumMethod, params: Vec<Value>) -> Self {
        Self { id: None, method: method.as_str().to_string(), params }
    }
}

/// Replace control characters with spaces. Some firmwares put raw tabs
/// inside JSON strings, which serde_json rejects.
fn sanitize_json_input(input: &str) -> String {
    input.chars().map(|c| if c.is_control() && c != '\n' && c != '\r' { ' ' } else { c }).collect()
}

/// Unmarshal a JSON-RPC event from a string
/// Automatically sanitizes control characters that are invalid in JSON
pub fn unmarshal_event(input: &str) -> Result<JsonRpcEvent, serde_json::Error> {
    let needs_sanitization = input.chars().any(|c| c.is_control() && c != '\n' && c != '\r');

    if needs_sanitization {
        let sanitized = sanitize_json_input(input);
        match serde_json::from_str(&sanitized) {
            Ok(result) => {
                tracing::debug!("JSON input sanitized (control characters replaced with spaces)");
                Ok(result)
            }
            Err(e) => {
                tracing::warn!("JSON sanitization applied but parsing still failed: {}", e);
                Err(e)
            }
        }
    } else {
        serde_json::from_str(input)
    }
}
