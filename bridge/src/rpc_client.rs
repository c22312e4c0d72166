use crate::constants::{RPC_IN_INITIAL_DOWNLOAD, RPC_IN_WARMUP};
use crate::errors::BridgeError;
use crate::log_colors::LogColors;
use crate::node_api::{BlockTemplate, NodeApi, SubmitOutcome, SyncStatus};
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

/// Basic-auth credentials for the node RPC port
#[derive(Clone, Debug)]
pub struct Auth {
    username: String,
    password: String,
}

impl Auth {
    pub fn new(username: String, password: String) -> Auth {
        Auth { username, password }
    }

    fn header_value(&self) -> String {
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", self.username, self.password)))
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResult {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize, Clone)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    blocks: u64,
    headers: u64,
    #[serde(rename = "verificationprogress")]
    verification_progress: f64,
    #[serde(rename = "initialblockdownload", default)]
    initial_block_download: bool,
}

/// JSON-RPC over HTTP client for the node
#[derive(Debug)]
pub struct NodeRpcClient {
    client: Client<HttpConnector, Full<Bytes>>,
    url: hyper::Uri,
    auth: Option<Auth>,
    template_rules: Vec<String>,
    next_id: AtomicU64,
}

impl NodeRpcClient {
    pub fn new(address: &str, auth: Option<Auth>, template_rules: Vec<String>) -> Result<Self, BridgeError> {
        // The connector is plain HTTP only
        if address.starts_with("https://") {
            return Err(BridgeError::BackendUnavailable(format!(
                "node address '{}' uses https, which is not supported; use an http:// endpoint",
                address
            )));
        }
        let address = if address.starts_with("http://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let url = address
            .parse::<hyper::Uri>()
            .map_err(|e| BridgeError::BackendUnavailable(format!("invalid node address '{}': {}", address, e)))?;

        tracing::debug!("{} {} {}", LogColors::api("[NODE]"), LogColors::label("RPC endpoint:"), url);

        let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { client, url, auth, template_rules, next_id: AtomicU64::new(1) })
    }

    async fn send_json_rpc_request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let request = JsonRpcRequest { jsonrpc: "1.0", id: self.next_id.fetch_add(1, Ordering::Relaxed), method, params };
        let request_body = serde_json::to_string(&request)
            .map_err(|e| BridgeError::InternalError(format!("failed to encode {} request: {}", method, e)))?;

        let mut builder = Request::builder().method("POST").uri(self.url.clone()).header(CONTENT_TYPE, "application/json");
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth.header_value());
        }
        let req = builder
            .body(Full::<Bytes>::from(request_body))
            .map_err(|e| BridgeError::InternalError(format!("failed to build {} request: {}", method, e)))?;

        let response =
            self.client.request(req).await.map_err(|e| BridgeError::BackendUnavailable(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| BridgeError::BackendUnavailable(format!("{} response read failed: {}", method, e)))?
            .to_bytes();

        // Nodes answer RPC-level errors with a 500 and a JSON body, so the body
        // is decoded before the status is considered.
        let decoded: JsonRpcResult = match serde_json::from_slice(&body) {
            Ok(decoded) => decoded,
            Err(e) if status.is_success() => {
                return Err(BridgeError::BackendUnavailable(format!("{} returned undecodable body: {}", method, e)));
            }
            Err(_) => return Err(BridgeError::BackendUnavailable(format!("{} returned HTTP {}", method, status))),
        };

        if let Some(err) = decoded.error {
            return Err(map_rpc_error(method, &err));
        }
        Ok(decoded.result.unwrap_or(Value::Null))
    }
}

fn map_rpc_error(method: &str, err: &JsonRpcError) -> BridgeError {
    match err.code {
        RPC_IN_INITIAL_DOWNLOAD | RPC_IN_WARMUP => {
            tracing::debug!("{} {} reports node still syncing: {}", LogColors::api("[NODE]"), method, err.message);
            BridgeError::NotSynced(0.0)
        }
        code => BridgeError::BackendUnavailable(format!("{} rpc error {}: {}", method, code, err.message)),
    }
}

fn decode_submit_result(result: Value) -> SubmitOutcome {
    match result {
        Value::Null | Value::Bool(true) => SubmitOutcome::Accepted,
        Value::Bool(false) => SubmitOutcome::Rejected("rejected".to_string()),
        Value::String(reason) => SubmitOutcome::Rejected(reason),
        other => SubmitOutcome::Rejected(other.to_string()),
    }
}

#[async_trait::async_trait]
impl NodeApi for NodeRpcClient {
    async fn get_sync_status(&self) -> Result<SyncStatus, BridgeError> {
        let result = self.send_json_rpc_request("getblockchaininfo", json!([])).await?;
        let info: BlockchainInfo = serde_json::from_value(result)
            .map_err(|e| BridgeError::BackendUnavailable(format!("getblockchaininfo returned unexpected shape: {}", e)))?;
        Ok(SyncStatus::new(info.blocks, info.headers, info.verification_progress, info.initial_block_download))
    }

    async fn get_block_template(&self) -> Result<BlockTemplate, BridgeError> {
        let result = self.send_json_rpc_request("getblocktemplate", json!([{ "rules": self.template_rules }])).await?;
        serde_json::from_value(result)
            .map_err(|e| BridgeError::BackendUnavailable(format!("getblocktemplate returned unexpected shape: {}", e)))
    }

    async fn submit_block(&self, params: Vec<String>) -> Result<SubmitOutcome, BridgeError> {
        let result = self.send_json_rpc_request("submitblock", json!(params)).await?;
        let outcome = decode_submit_result(result);
        match &outcome {
            SubmitOutcome::Accepted => tracing::info!("{} {}", LogColors::block("[BLOCK]"), "block accepted by node"),
            SubmitOutcome::Rejected(reason) if reason == "duplicate" => {
                tracing::warn!("{} block rejected by node: {}", LogColors::block("[BLOCK]"), reason)
            }
            SubmitOutcome::Rejected(reason) => tracing::error!("{} block rejected by node: {}", LogColors::block("[BLOCK]"), reason),
        }
        Ok(outcome)
    }
}
