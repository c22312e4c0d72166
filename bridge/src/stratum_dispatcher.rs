//! Per-frame protocol handling for miner sessions.
//!
//! Every inbound line is parsed, routed by method and answered on the session's
//! outbound queue. Handlers run behind a panic boundary so one bad frame turns
//! into an internal error response instead of tearing down the connection.

use crate::algorithm::Algorithm;
use crate::client_session::ClientSession;
use crate::errors::{BridgeError, ErrorShortCode};
use crate::job_formatter::format_job_params;
use crate::job_manager::{Job, JobManager};
use crate::jsonrpc_event::{JsonRpcEvent, JsonRpcNotification, JsonRpcResponse, StratumMethod, unmarshal_event};
use crate::log_colors::LogColors;
use crate::node_api::{NodeApi, SubmitOutcome, call_with_timeout};
use crate::prom::{record_job_sent, record_share_accepted, record_share_rejected, record_worker_error};
use crate::session_registry::SessionRegistry;
use futures_util::FutureExt;
use serde_json::{Value, json};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Rejection code used for backend refusals of a submitted share
const SUBMIT_REJECT_CODE: i32 = 20;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Algorithms miners may subscribe to
    pub algorithms: Vec<Algorithm>,
    /// Used for empty subscribe params and for authorize without subscribe
    pub default_algorithm: Algorithm,
    pub backend_timeout: Duration,
}

pub struct StratumDispatcher {
    node: Arc<dyn NodeApi>,
    jobs: Arc<JobManager>,
    registry: Arc<SessionRegistry>,
    config: DispatcherConfig,
}

impl StratumDispatcher {
    pub fn new(node: Arc<dyn NodeApi>, jobs: Arc<JobManager>, registry: Arc<SessionRegistry>, config: DispatcherConfig) -> Self {
        Self { node, jobs, registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    /// Handle one raw line from the miner. Never fails: every problem is reported to the session.
    pub async fn dispatch_line(&self, session: &Arc<ClientSession>, line: &str) {
        debug!("{} {} {}", LogColors::miner_to_bridge("[MINER->BRIDGE]"), session.remote_addr(), line);

        match unmarshal_event(line) {
            Ok(event) => self.dispatch(session, event).await,
            Err(e) => {
                warn!("[MINER->BRIDGE] unparseable frame from {}: {}", session.remote_addr(), e);
                self.reply_error(session, None, &BridgeError::ProtocolParseError(e.to_string()));
            }
        }
    }

    /// Route a parsed event inside the failure boundary
    pub async fn dispatch(&self, session: &Arc<ClientSession>, event: JsonRpcEvent) {
        let id = event.id.clone();
        let method = event.method_enum();

        match AssertUnwindSafe(self.handle_event(session, event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if method == StratumMethod::Submit {
                    session.record_share(false);
                    record_share_rejected(session.algorithm(), &wallet_label(session));
                }
                self.reply_error(session, id, &err);
            }
            Err(panic) => {
                error!(
                    "{} handler for {} panicked on session {}: {}",
                    LogColors::error("[ERROR]"),
                    method.as_str(),
                    session.id(),
                    panic_message(&*panic)
                );
                self.reply_error(session, id, &BridgeError::InternalError("internal error".to_string()));
            }
        }
    }

    async fn handle_event(&self, session: &Arc<ClientSession>, event: JsonRpcEvent) -> Result<(), BridgeError> {
        match event.method_enum() {
            StratumMethod::Subscribe => self.handle_subscribe(session, event),
            StratumMethod::Authorize => self.handle_authorize(session, event).await,
            StratumMethod::Submit => self.handle_submit(session, event).await,
            _ => Err(BridgeError::UnknownMethod(event.method)),
        }
    }

    fn handle_subscribe(&self, session: &Arc<ClientSession>, event: JsonRpcEvent) -> Result<(), BridgeError> {
        let param = event.str_param(0).unwrap_or_default();
        let requested = self.resolve_algorithm(param)?;

        let binding = session.bind_algorithm(requested, param, || self.registry.assign_extranonce());
        if !binding.newly_bound && binding.algorithm != requested {
            warn!(
                "[CONNECTION] session {} already bound to {}, ignoring subscribe for {}",
                session.id(),
                binding.algorithm,
                requested
            );
        }
        info!(
            "[CONNECTION] session {} subscribed: {} (extranonce {}, agent '{}')",
            session.id(),
            binding.algorithm,
            binding.extranonce,
            session.state().user_agent
        );

        send_difficulty(session, binding.difficulty)?;

        let sid = format!("{:016x}", session.id());
        let result = json!([
            [["mining.set_difficulty", sid], ["mining.notify", sid]],
            binding.extranonce,
            self.registry.extranonce_size()
        ]);
        session.send(&JsonRpcResponse::success(event.id, result))
    }

    fn resolve_algorithm(&self, param: &str) -> Result<Algorithm, BridgeError> {
        let algorithm =
            if param.trim().is_empty() { self.config.default_algorithm } else { Algorithm::from_subscribe_param(param)? };
        if !self.config.algorithms.contains(&algorithm) {
            return Err(BridgeError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        Ok(algorithm)
    }

    async fn handle_authorize(&self, session: &Arc<ClientSession>, event: JsonRpcEvent) -> Result<(), BridgeError> {
        let username = text_param(&event, 0).ok_or_else(|| BridgeError::InvalidParams("missing username".to_string()))?;

        // A miner that skipped subscribe still needs an algorithm and extranonce
        let implicit = match session.algorithm() {
            Some(_) => None,
            None => Some(session.bind_algorithm(self.config.default_algorithm, "", || self.registry.assign_extranonce())),
        };

        session.authorize(&username);
        let state = session.state();
        info!("[CONNECTION] session {} authorized wallet '{}' worker '{}'", session.id(), state.wallet, state.worker);

        session.send(&JsonRpcResponse::success(event.id, Value::Bool(true)))?;

        if let Some(binding) = implicit {
            debug!("[CONNECTION] session {} bound to default algorithm {}", session.id(), binding.algorithm);
            send_difficulty(session, binding.difficulty)?;
        }

        let Some(algorithm) = state.algorithm else {
            return Ok(());
        };
        // Join the current job when there is one; the next broadcast tick refreshes it
        let job = match self.jobs.latest_job(algorithm) {
            Some(job) => Ok(job),
            None => self.jobs.create_job(algorithm).await,
        };
        match job {
            Ok(job) => send_job(session, &job, true)?,
            Err(e) => {
                if e.is_recoverable() {
                    warn!("[JOB] initial {} job for session {} failed: {}", algorithm, session.id(), e);
                } else {
                    error!("[JOB] initial {} job for session {} failed: {}", algorithm, session.id(), e);
                }
                record_worker_error(&state.wallet, e.short_code().as_str());
            }
        }
        Ok(())
    }

    async fn handle_submit(&self, session: &Arc<ClientSession>, event: JsonRpcEvent) -> Result<(), BridgeError> {
        let state = session.state();
        if !state.authorized {
            return Err(BridgeError::Unauthorized);
        }
        let algorithm = state.algorithm.ok_or(BridgeError::NotSubscribed)?;

        let worker = text_param(&event, 0).unwrap_or_default();
        let job_id = required_param(&event, 1, "job id")?;
        let nonce = normalize_hex("nonce", required_param(&event, 2, "nonce")?)?;
        let header = normalize_hex("header", required_param(&event, 3, "header")?)?;
        let mix_hash = match (algorithm.uses_mix_hash(), event.str_param(4)) {
            (true, Some(mix)) => Some(normalize_hex("mix hash", mix)?),
            (true, None) => return Err(BridgeError::InvalidParams("missing mix hash".to_string())),
            (false, _) => None,
        };

        match self.jobs.get_job(job_id) {
            Some(job) if job.algorithm == algorithm => {}
            _ => return Err(BridgeError::JobNotFound(job_id.to_string())),
        }

        let params = match mix_hash {
            Some(mix) => vec![header, mix, nonce],
            None => vec![header, nonce],
        };
        debug!("[SUBMIT] session {} worker '{}' job {} -> submitblock {:?}", session.id(), worker, job_id, params);

        let outcome = call_with_timeout(self.config.backend_timeout, "submitblock", self.node.submit_block(params)).await;
        let reason = match outcome {
            Ok(SubmitOutcome::Accepted) => {
                session.record_share(true);
                record_share_accepted(algorithm, &wallet_label(session));
                info!("{} {} job {} accepted for {} ({})", LogColors::block("[SUBMIT]"), algorithm, job_id, state.wallet, worker);
                return session.send(&JsonRpcResponse::success(event.id, Value::Bool(true)));
            }
            Ok(SubmitOutcome::Rejected(reason)) => reason,
            Err(e) => e.to_string(),
        };

        warn!("[SUBMIT] {} job {} from {} ({}) rejected: {}", algorithm, job_id, state.wallet, worker, reason);
        session.record_share(false);
        record_share_rejected(Some(algorithm), &wallet_label(session));
        record_worker_error(&wallet_label(session), ErrorShortCode::SubmitRejected.as_str());
        session.send(&JsonRpcResponse::reject(event.id, SUBMIT_REJECT_CODE, &reason))
    }

    fn reply_error(&self, session: &ClientSession, id: Option<Value>, err: &BridgeError) {
        debug!("{} session {} error: {}", LogColors::bridge_to_miner("[BRIDGE->MINER]"), session.id(), err);
        record_worker_error(&wallet_label(session), err.short_code().as_str());
        if let Err(e) = session.send(&JsonRpcResponse::error(id, err.code(), &err.to_string(), None)) {
            debug!("[BRIDGE->MINER] dropping error reply for session {}: {}", session.id(), e);
        }
    }
}

/// Push `mining.set_difficulty` to one session
pub fn send_difficulty(session: &ClientSession, difficulty: f64) -> Result<(), BridgeError> {
    debug!("{} session {} difficulty {}", LogColors::bridge_to_miner("[BRIDGE->MINER]"), session.id(), difficulty);
    session.send(&JsonRpcNotification::new(StratumMethod::SetDifficulty, vec![json!(difficulty)])).inspect_err(|_| {
        record_worker_error(&wallet_label(session), ErrorShortCode::FailedSetDiff.as_str());
    })
}

/// Push `mining.notify` for `job` to one session
pub fn send_job(session: &ClientSession, job: &Job, clean_jobs: bool) -> Result<(), BridgeError> {
    let notification = JsonRpcNotification::new(StratumMethod::Notify, format_job_params(job, clean_jobs));
    match session.send(&notification) {
        Ok(()) => {
            record_job_sent(job.algorithm, &wallet_label(session));
            debug!("{} session {} job {}", LogColors::bridge_to_miner("[BRIDGE->MINER]"), session.id(), job.id);
            Ok(())
        }
        Err(e) => {
            record_worker_error(&wallet_label(session), ErrorShortCode::FailedSendWork.as_str());
            Err(e)
        }
    }
}

fn wallet_label(session: &ClientSession) -> String {
    let wallet = session.wallet();
    if wallet.is_empty() { "unknown".to_string() } else { wallet }
}

/// Parameter at `idx` as text. Numbers and other scalars are stringified; null and missing are `None`.
fn text_param(event: &JsonRpcEvent, idx: usize) -> Option<String> {
    match event.params.get(idx)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn required_param<'a>(event: &'a JsonRpcEvent, idx: usize, name: &str) -> Result<&'a str, BridgeError> {
    event.str_param(idx).ok_or_else(|| BridgeError::InvalidParams(format!("missing {}", name)))
}

/// Strip an optional `0x`, lowercase, and require valid hex
fn normalize_hex(name: &str, value: &str) -> Result<String, BridgeError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")).unwrap_or(trimmed).to_ascii_lowercase();
    if digits.is_empty() || hex::decode(&digits).is_err() {
        return Err(BridgeError::InvalidParams(format!("{} is not valid hex: {}", name, value)));
    }
    Ok(digits)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
