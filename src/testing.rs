//! Scripted fakes shared by the unit tests.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::http::{ApiRequest, HttpTransport, RawResponse, TransportError};

pub(crate) fn jwt(sub: &str, role: &str, name: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(
        json!({ "sub": sub, "role": role, "name": name, "exp": exp }).to_string(),
    );
    format!("{header}.{claims}.signature")
}

pub(crate) fn ok_body(data: Value) -> Value {
    json!({ "success": true, "message": "", "data": data })
}

pub(crate) fn failure_body(message: &str) -> Value {
    json!({ "success": false, "message": message, "data": null })
}

pub(crate) fn auth_body(access: &str, refresh: &str, id: &str, name: &str) -> Value {
    ok_body(json!({
        "accessToken": access,
        "refreshToken": refresh,
        "profile": { "id": id, "name": name, "email": "a@b.com", "role": "Customer" },
    }))
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

enum Scripted {
    Respond(u16, Value),
    Fail(TransportError),
}

type Route = Arc<dyn Fn(Option<&str>) -> (u16, Value) + Send + Sync>;

/// Per-path queues of canned answers, with an optional fallback handler that
/// decides based on the bearer token. Unscripted paths answer 500.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<RecordedCall>>,
    holds: Mutex<HashMap<String, Arc<Notify>>>,
    yield_first: AtomicBool,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, path: &str, scripted: Scripted) {
        self.queues
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(scripted);
    }

    pub(crate) fn respond(&self, path: &str, status: u16, body: Value) {
        self.push(path, Scripted::Respond(status, body));
    }

    pub(crate) fn fail(&self, path: &str, err: TransportError) {
        self.push(path, Scripted::Fail(err));
    }

    pub(crate) fn route(
        &self,
        path: &str,
        handler: impl Fn(Option<&str>) -> (u16, Value) + Send + Sync + 'static,
    ) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::new(handler));
    }

    /// Parks the next call to `path` until the returned gate is notified.
    pub(crate) fn hold(&self, path: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert(path.to_string(), gate.clone());
        gate
    }

    /// Makes every call suspend once so concurrent callers interleave.
    pub(crate) fn yield_on_execute(&self) {
        self.yield_first.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.calls_for(path).len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<RawResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer: bearer.map(str::to_string),
            body: request.body.clone(),
        });

        let gate = self.holds.lock().unwrap().remove(&request.path);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.yield_first.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        let (status, body) = match queued {
            Some(Scripted::Respond(status, body)) => (status, body),
            Some(Scripted::Fail(err)) => return Err(err),
            None => {
                let route = self.routes.lock().unwrap().get(&request.path).cloned();
                match route {
                    Some(route) => route(bearer),
                    None => (500, json!({ "success": false, "message": "unscripted" })),
                }
            }
        };
        Ok(RawResponse::new(status, body.to_string()))
    }
}
