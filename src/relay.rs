use crate::error_reason::ErrorReason;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use reqwest::Client;
use serde_json::{json, Value};
use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tracing::debug;

const CIRCUIT_OPEN_CODE: i64 = -32099;

#[derive(Clone)]
pub struct HttpState {
    pub app: Arc<AppState>,
    pub client: Client,
}

// ----------------------
// Handlers
// ----------------------
pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

pub async fn status(State(state): State<HttpState>) -> (StatusCode, Json<Value>) {
    let breaker = state.app.breaker().await;
    let obj = json!({
        "breaker": breaker.snapshot(),
        "total_calls": state.app.total_calls.load(Ordering::Relaxed),
        "rejected_calls": state.app.rejected_calls.load(Ordering::Relaxed),
        "upstream_failures": state.app.upstream_failures.load(Ordering::Relaxed),
        "last_error": state.app.last_error.get().as_str(),
    });
    (StatusCode::OK, Json(obj))
}

pub async fn reset(State(state): State<HttpState>) -> (StatusCode, Json<Value>) {
    let breaker = state.app.breaker().await;
    breaker.reset();
    (StatusCode::OK, Json(json!({"state": breaker.state()})))
}

pub async fn relay(State(state): State<HttpState>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    state.app.total_calls.fetch_add(1, Ordering::Relaxed);
    let id_value = body.get("id").cloned().unwrap_or(Value::Null);

    let breaker = state.app.breaker().await;
    if !breaker.allow() {
        state.app.rejected_calls.fetch_add(1, Ordering::Relaxed);
        let mut resp = rpc_error(id_value, CIRCUIT_OPEN_CODE, "circuit open".to_string());
        resp["error"]["data"] = json!({"state": breaker.state()});
        return (StatusCode::SERVICE_UNAVAILABLE, Json(resp));
    }

    let (url, timeout_ms) = {
        let cfg = state.app.cfg.read().await;
        (cfg.upstream.url.clone(), cfg.upstream.timeout_ms)
    };

    let outcome = forward(&state.client, &url, &body, Duration::from_millis(timeout_ms)).await;
    breaker.report_outcome(outcome.is_ok());

    match outcome {
        Ok(v) => (StatusCode::OK, Json(v)),
        Err((reason, msg)) => {
            debug!(reason = reason.as_str(), "upstream call failed: {}", msg);
            state.app.upstream_failures.fetch_add(1, Ordering::Relaxed);
            state.app.last_error.set(reason);
            let resp = rpc_error(id_value, -32603, format!("Upstream error: {}", msg));
            (StatusCode::BAD_GATEWAY, Json(resp))
        }
    }
}

// -------- helpers --------

async fn forward(client: &Client, url: &str, payload: &Value, timeout: Duration) -> Result<Value, (ErrorReason, String)> {
    let res = tokio::time::timeout(timeout, client.post(url).json(payload).send()).await;
    let resp = match res {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => return Err((ErrorReason::HttpError, e.to_string())),
        Err(_) => return Err((ErrorReason::Timeout, "upstream timeout".to_string())),
    };
    if !resp.status().is_success() {
        return Err((ErrorReason::BadStatus, format!("status {}", resp.status())));
    }
    let v = resp
        .json::<Value>()
        .await
        .map_err(|e| (ErrorReason::BadJson, format!("bad json: {}", e)))?;
    classify_body(v)
}

fn classify_body(v: Value) -> Result<Value, (ErrorReason, String)> {
    match v.get("error") {
        Some(err) if !err.is_null() => Err((ErrorReason::RpcError, err.to_string())),
        _ => Ok(v),
    }
}

fn rpc_error(id: Value, code: i64, message: String) -> Value {
    json!({"jsonrpc":"2.0","id": id,"error":{"code": code,"message": message}})
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use tripwire::config::Config;
    use tripwire::{Breaker, BreakerOptions, ManualClock};

    // Nothing listens on port 1, so forwarded calls fail fast.
    const YAML: &str = "server: { bind_addr: \"127.0.0.1\", port: 5588 }\nupstream: { url: \"http://127.0.0.1:1\", timeout_ms: 2000 }\n";

    async fn http_state(breaker: Breaker) -> (HttpState, Arc<Breaker>) {
        let app = Arc::new(AppState::new(Config::from_yaml(YAML).unwrap()));
        let breaker = Arc::new(breaker);
        *app.breaker.write().await = breaker.clone();
        (HttpState { app, client: Client::new() }, breaker)
    }

    fn rejecting_half_open() -> Breaker {
        let clock = Arc::new(ManualClock::new());
        let options = BreakerOptions::new().with_half_open_interval(Duration::from_secs(1));
        let breaker = Breaker::with_parts(options, clock.clone(), StepRng::new(u64::MAX, 0));
        breaker.trip();
        clock.advance(Duration::from_secs(2));
        breaker
    }

    #[tokio::test]
    async fn open_breaker_rejects_with_503() {
        let (state, breaker) = http_state(Breaker::with_defaults()).await;
        breaker.trip();

        let (code, Json(body)) = relay(State(state.clone()), Json(json!({"id": 3, "method": "eth_chainId"}))).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["id"], 3);
        assert_eq!(body["error"]["code"], CIRCUIT_OPEN_CODE);
        assert_eq!(body["error"]["message"], "circuit open");
        assert_eq!(body["error"]["data"]["state"], "open");
        assert_eq!(state.app.rejected_calls.load(Ordering::Relaxed), 1);
        assert_eq!(breaker.failure_count() + breaker.success_count(), 0);
    }

    #[tokio::test]
    async fn half_open_rejection_keeps_open_message() {
        let (state, breaker) = http_state(rejecting_half_open()).await;

        let (code, Json(body)) = relay(State(state), Json(json!({"id": 1}))).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["message"], "circuit open");
        assert_eq!(body["error"]["data"]["state"], "half-open");
        assert!(breaker.is_half_open());
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_once() {
        let (state, breaker) = http_state(Breaker::with_defaults()).await;

        let (code, Json(body)) = relay(State(state.clone()), Json(json!({"id": 9, "method": "eth_chainId"}))).await;
        assert_eq!(code, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.success_count(), 0);
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(state.app.upstream_failures.load(Ordering::Relaxed), 1);
        assert_ne!(state.app.last_error.get(), ErrorReason::None);
    }

    #[tokio::test]
    async fn reset_closes_breaker_and_zeroes_counters() {
        let (state, breaker) = http_state(Breaker::with_defaults()).await;
        breaker.record_failure();
        breaker.trip();

        let (code, Json(body)) = reset(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["state"], "closed");
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.failure_count(), 0);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn status_reports_breaker_and_counters() {
        let (state, breaker) = http_state(Breaker::with_defaults()).await;
        breaker.trip();
        let _ = relay(State(state.clone()), Json(json!({"id": 1}))).await;

        let (code, Json(body)) = status(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["breaker"]["state"], "open");
        assert_eq!(body["total_calls"], 1);
        assert_eq!(body["rejected_calls"], 1);
        assert_eq!(body["upstream_failures"], 0);
        assert_eq!(body["last_error"], "-");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (code, Json(body)) = health().await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn rpc_error_member_counts_as_failure() {
        let body = json!({"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}});
        let (reason, _) = classify_body(body).unwrap_err();
        assert_eq!(reason, ErrorReason::RpcError);
    }

    #[test]
    fn result_or_null_error_is_success() {
        assert!(classify_body(json!({"jsonrpc":"2.0","id":1,"result":"0x10"})).is_ok());
        assert!(classify_body(json!({"id":1,"result":1,"error":null})).is_ok());
    }

    #[test]
    fn rpc_error_shape() {
        let v = rpc_error(json!(7), CIRCUIT_OPEN_CODE, "circuit open".into());
        assert_eq!(v["id"], 7);
        assert_eq!(v["error"]["code"], -32099);
        assert_eq!(v["error"]["message"], "circuit open");
    }
}
