use axum::{
    extract::{Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    borrow::Cow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::net::TcpListener;

const VERIFY_PATH: &str = "/verify";

/// URL on which nothing listens, for simulating an unreachable verification service.
pub const UNREACHABLE_VERIFY_URL: &str = "http://127.0.0.1:1/verify";

#[derive(Clone)]
pub struct FakeFriendlyCaptcha {
    required_sitekey: Cow<'static, str>,
    required_secret: Cow<'static, str>,
    required_solution: Option<String>,
    return_invalid_response: bool,
    return_solution_timeout: bool,
    return_server_error: bool,
    response_delay: Option<Duration>,
    request_count: Arc<AtomicUsize>,
}

/// Handle on a fake which is serving requests in the background.
pub struct RunningFakeFriendlyCaptcha {
    verify_url: String,
    request_count: Arc<AtomicUsize>,
}

#[derive(Deserialize)]
struct VerifyRequestPayload {
    solution: String,
    secret: String,
    sitekey: String,
}

#[derive(Serialize)]
struct VerifyResponsePayload {
    success: bool,
    errors: Vec<String>,
}

impl FakeFriendlyCaptcha {
    pub fn new(
        required_sitekey: impl Into<Cow<'static, str>>,
        required_secret: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            required_sitekey: required_sitekey.into(),
            required_secret: required_secret.into(),
            required_solution: None,
            return_invalid_response: false,
            return_solution_timeout: false,
            return_server_error: false,
            response_delay: None,
            request_count: Default::default(),
        }
    }

    pub fn require_solution(self, required_solution: impl AsRef<str>) -> Self {
        Self {
            required_solution: Some(required_solution.as_ref().into()),
            ..self
        }
    }

    pub fn return_invalid_response(self) -> Self {
        Self {
            return_invalid_response: true,
            ..self
        }
    }

    pub fn return_solution_timeout(self) -> Self {
        Self {
            return_solution_timeout: true,
            ..self
        }
    }

    /// Answers with a 500 whose body still parses as an unsuccessful verification.
    pub fn return_server_error(self) -> Self {
        Self {
            return_server_error: true,
            ..self
        }
    }

    pub fn respond_after(self, delay: Duration) -> Self {
        Self {
            response_delay: Some(delay),
            ..self
        }
    }

    /// Binds an ephemeral port on localhost and serves the verification endpoint on it.
    pub async fn start(self) -> RunningFakeFriendlyCaptcha {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let request_count = self.request_count.clone();
        let app = Router::new()
            .route(VERIFY_PATH, post(verify))
            .with_state(self);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        RunningFakeFriendlyCaptcha {
            verify_url: format!("http://{address}{VERIFY_PATH}"),
            request_count,
        }
    }
}

impl RunningFakeFriendlyCaptcha {
    pub fn verify_url(&self) -> String {
        self.verify_url.clone()
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

async fn verify(
    State(state): State<FakeFriendlyCaptcha>,
    Json(payload): Json<VerifyRequestPayload>,
) -> Response {
    state.request_count.fetch_add(1, Ordering::SeqCst);
    debug!("Fake FriendlyCaptcha got solution {}", payload.solution);
    if let Some(delay) = state.response_delay {
        tokio::time::sleep(delay).await;
    }
    if state.return_invalid_response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            "Invalid response",
        )
            .into_response()
    } else if state.return_server_error {
        failure_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
    } else if state.return_solution_timeout {
        failure_response(StatusCode::OK, "solution_timeout_or_duplicate")
    } else if payload.sitekey != state.required_sitekey {
        failure_response(StatusCode::BAD_REQUEST, "bad_request")
    } else if payload.secret != state.required_secret {
        failure_response(StatusCode::UNAUTHORIZED, "secret_invalid")
    } else if state.required_solution.is_some() && Some(payload.solution) != state.required_solution
    {
        failure_response(StatusCode::OK, "solution_invalid")
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            json!(VerifyResponsePayload {
                success: true,
                errors: vec![],
            })
            .to_string(),
        )
            .into_response()
    }
}

fn failure_response(status: StatusCode, error: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        json!(VerifyResponsePayload {
            success: false,
            errors: vec![error.into()],
        })
        .to_string(),
    )
        .into_response()
}
