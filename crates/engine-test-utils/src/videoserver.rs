//! Fake videoserver for engine tests.
//!
//! A wiremock server that answers every videoserver request the engine
//! makes:
//! - `create` and `attach` return fresh numeric ids
//! - a plugin request carrying an SDP offer gets an SDP answer
//! - a subscriber `join` and an `update` get an SDP offer
//! - everything else succeeds with empty plugin data
//!
//! Every request is recorded. Tests can make requests fail with a
//! videoserver error code, make the whole server unavailable, or delay
//! answers.
//!
//! # Example
//!
//! ```rust,ignore
//! use engine_test_utils::FakeVideoServer;
//!
//! let videoserver = FakeVideoServer::start().await;
//! videoserver.fail_message("destroy", 426);
//!
//! // ... stop a meeting ...
//!
//! assert_eq!(videoserver.messages("destroy").len(), 2);
//! assert_eq!(videoserver.verb_count("detach"), 2);
//! ```

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// SDP the fake answers publish and audio offers with.
pub const FAKE_ANSWER_SDP: &str = "v=0\r\ns=fake-answer\r\n";

/// SDP the fake offers to subscribers.
pub const FAKE_OFFER_SDP: &str = "v=0\r\ns=fake-offer\r\n";

/// First id handed out by `create` and `attach`.
const FIRST_ID: u64 = 1000;

/// One request received by the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCall {
    /// Top-level verb: `create`, `attach`, `message`, `detach`, `destroy`.
    pub verb: String,
    /// `body.request` of a plugin message.
    pub request: Option<String>,
    pub connection_id: Option<String>,
    pub handle_id: Option<String>,
    pub plugin: Option<String>,
    pub body: Option<Value>,
    pub jsep: Option<Value>,
}

impl GatewayCall {
    /// Field of the plugin body, if present.
    #[must_use]
    pub fn body_field(&self, key: &str) -> Option<&Value> {
        self.body.as_ref()?.get(key)
    }
}

#[derive(Debug, Clone)]
struct Failure {
    verb: String,
    request: Option<String>,
    code: i64,
    remaining: Option<usize>,
}

impl Failure {
    fn matches(&self, call: &GatewayCall) -> bool {
        self.verb == call.verb
            && (self.request.is_none() || self.request == call.request)
            && self.remaining != Some(0)
    }
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    calls: Vec<GatewayCall>,
    failures: Vec<Failure>,
    unavailable: bool,
    delay: Option<Duration>,
}

pub struct FakeVideoServer {
    server: MockServer,
    state: Arc<Mutex<FakeState>>,
}

impl FakeVideoServer {
    /// Start the fake on a random local port.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(FakeState {
            next_id: FIRST_ID,
            ..FakeState::default()
        }));

        Mock::given(method("POST"))
            .and(path_regex(r"^/janus(/[^/]+){0,2}$"))
            .respond_with(JanusResponder {
                state: Arc::clone(&state),
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    /// Base URL to configure the engine with.
    #[must_use]
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Answer every plugin message `request` with `code` until cleared.
    pub fn fail_message(&self, request: &str, code: i64) {
        self.push_failure("message", Some(request), code, None);
    }

    /// Answer the next `times` plugin messages `request` with `code`.
    pub fn fail_message_times(&self, request: &str, code: i64, times: usize) {
        self.push_failure("message", Some(request), code, Some(times));
    }

    /// Answer every top-level `verb` with `code` until cleared.
    pub fn fail_verb(&self, verb: &str, code: i64) {
        self.push_failure(verb, None, code, None);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Answer every request with HTTP 503.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Delay every answer by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Every request received, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Plugin messages with the given `request`, oldest first.
    #[must_use]
    pub fn messages(&self, request: &str) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.verb == "message" && c.request.as_deref() == Some(request))
            .collect()
    }

    /// Number of requests with the given top-level verb.
    #[must_use]
    pub fn verb_count(&self, verb: &str) -> usize {
        self.calls().iter().filter(|c| c.verb == verb).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn push_failure(&self, verb: &str, request: Option<&str>, code: i64, remaining: Option<usize>) {
        self.state.lock().unwrap().failures.push(Failure {
            verb: verb.to_string(),
            request: request.map(str::to_string),
            code,
            remaining,
        });
    }
}

struct JanusResponder {
    state: Arc<Mutex<FakeState>>,
}

impl Respond for JanusResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let payload: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let call = parse_call(request.url.path(), &payload);

        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        let delay = state.delay;

        let template = if state.unavailable {
            ResponseTemplate::new(503)
        } else if let Some(code) = take_failure(&mut state.failures, &call) {
            error_response(&call, code)
        } else {
            success_response(&mut state, &call, &payload)
        };

        match delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

fn parse_call(path: &str, payload: &Value) -> GatewayCall {
    let mut segments = path.trim_start_matches('/').split('/').skip(1);
    let body = payload.get("body").cloned();
    GatewayCall {
        verb: payload
            .get("janus")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        request: body
            .as_ref()
            .and_then(|b| b.get("request"))
            .and_then(Value::as_str)
            .map(str::to_string),
        connection_id: segments.next().map(str::to_string),
        handle_id: segments.next().map(str::to_string),
        plugin: payload
            .get("plugin")
            .and_then(Value::as_str)
            .map(str::to_string),
        body,
        jsep: payload.get("jsep").cloned(),
    }
}

fn take_failure(failures: &mut [Failure], call: &GatewayCall) -> Option<i64> {
    let failure = failures.iter_mut().find(|f| f.matches(call))?;
    if let Some(remaining) = failure.remaining.as_mut() {
        *remaining -= 1;
    }
    Some(failure.code)
}

fn error_response(call: &GatewayCall, code: i64) -> ResponseTemplate {
    let body = if call.verb == "message" {
        json!({
            "janus": "success",
            "plugindata": {
                "plugin": "fake",
                "data": {"error_code": code, "error": "injected failure"}
            }
        })
    } else {
        json!({
            "janus": "error",
            "error": {"code": code, "reason": "injected failure"}
        })
    };
    ResponseTemplate::new(200).set_body_json(body)
}

fn success_response(state: &mut FakeState, call: &GatewayCall, payload: &Value) -> ResponseTemplate {
    let transaction = payload.get("transaction").cloned().unwrap_or(Value::Null);

    let body = match call.verb.as_str() {
        "create" | "attach" => {
            let id = state.next_id;
            state.next_id += 1;
            json!({"janus": "success", "transaction": transaction, "data": {"id": id}})
        }
        "message" => {
            let mut body = json!({
                "janus": "success",
                "transaction": transaction,
                "plugindata": {"plugin": "fake", "data": {}}
            });
            if let Some(jsep) = reply_jsep(call) {
                body["jsep"] = jsep;
            }
            body
        }
        _ => json!({"janus": "success", "transaction": transaction}),
    };
    ResponseTemplate::new(200).set_body_json(body)
}

fn reply_jsep(call: &GatewayCall) -> Option<Value> {
    let offered = call
        .jsep
        .as_ref()
        .and_then(|j| j.get("type"))
        .and_then(Value::as_str)
        == Some("offer");
    if offered {
        return Some(json!({"type": "answer", "sdp": FAKE_ANSWER_SDP}));
    }

    let subscriber_join = call.request.as_deref() == Some("join")
        && call.body_field("ptype").and_then(Value::as_str) == Some("subscriber");
    if subscriber_join || call.request.as_deref() == Some("update") {
        return Some(json!({"type": "offer", "sdp": FAKE_OFFER_SDP}));
    }
    None
}
