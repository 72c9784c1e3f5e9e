//! The intercepted HTTP path.
//!
//! `ApiClient` wraps every REST call in the single-retry-after-refresh
//! policy: a 401 triggers at most one credential refresh and one replay of
//! the original request. Concurrent 401s coalesce onto one in-flight
//! refresh: the first failing request performs `POST /auth/refresh`, and
//! every request that fails while it is in flight adopts that refresh's
//! outcome instead of issuing its own.
//!
//! The HTTP exchange itself sits behind the [`HttpDispatch`] trait so the
//! policy is testable without a server; production uses
//! [`ReqwestDispatcher`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::message::ChatPayload;
use crate::session::{SessionGate, User};

/// Path of the credential refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Marker the server puts in 403 bodies for blocked accounts.
const BLOCKED_MARKER: &str = "blocked";

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

/// One HTTP exchange as the interceptor sees it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the configured base URL.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<Value>,
}

/// Response to an [`ApiRequest`].
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body (`Null` when the body was empty or not JSON).
    pub body: Value,
}

impl ApiResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors from the intercepted HTTP path.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401 that was not (or could not be) recovered by a refresh.
    #[error("authorization expired")]
    AuthExpired,
    /// 403 carrying the blocked-account marker. Terminal: the session is
    /// cleared and the blocked callback invoked before this is returned.
    #[error("account blocked")]
    AccountBlocked,
    /// 403 without the blocked marker. Not retried.
    #[error("forbidden")]
    Forbidden,
    /// Credential refresh failed. Terminal for the triggering request and
    /// every coalesced waiter; the session is cleared.
    #[error("credential refresh failed")]
    RefreshFailed,
    /// Any other non-success status, passed through unmodified.
    #[error("request failed with status {0}")]
    Status(u16),
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(String),
    /// The response body did not match the expected shape.
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

/// Performs one HTTP exchange. The seam that lets tests script responses.
#[async_trait]
pub trait HttpDispatch: Send + Sync {
    /// Execute the request and return the raw status + body.
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed dispatcher with a cookie store, so credentials ride on
/// every request the way the browser client sent them.
pub struct ReqwestDispatcher {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestDispatcher {
    /// Build a dispatcher for the given REST base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl HttpDispatch for ReqwestDispatcher {
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(ApiResponse { status, body })
    }
}

/// One rule excluding a path family from the refresh-and-retry protocol.
#[derive(Debug, Clone)]
pub struct ExclusionRule {
    /// Substring that marks a path as excluded.
    pub fragment: String,
    /// Substrings that exempt a matching path from this rule.
    pub exempt: Vec<String>,
}

impl ExclusionRule {
    /// Exclude every path containing `fragment`.
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            exempt: Vec::new(),
        }
    }

    /// Exempt paths containing `path` from this rule.
    pub fn with_exempt(mut self, path: impl Into<String>) -> Self {
        self.exempt.push(path.into());
        self
    }

    fn excludes(&self, path: &str) -> bool {
        path.contains(&self.fragment) && !self.exempt.iter().any(|e| path.contains(e))
    }
}

/// The set of endpoints the interceptor never retries after a 401.
///
/// Kept as data rather than control flow; the upstream list
/// (authentication endpoints except the current-user endpoint, plus the
/// expertise namespace) is domain-coupled and callers may replace it
/// wholesale.
#[derive(Debug, Clone)]
pub struct RetryExclusions {
    rules: Vec<ExclusionRule>,
}

impl RetryExclusions {
    /// An empty set: every 401 is eligible for refresh-and-retry.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// Build a set from explicit rules.
    pub fn from_rules(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    /// Whether `path` is excluded from refresh-and-retry.
    pub fn excludes(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| rule.excludes(path))
    }
}

impl Default for RetryExclusions {
    fn default() -> Self {
        Self {
            rules: vec![
                ExclusionRule::new("/auth").with_exempt("/auth/me"),
                ExclusionRule::new("/expertise"),
            ],
        }
    }
}

/// Outcome of the most recent refresh, guarded by the refresh mutex. The
/// epoch counter lives in an atomic so requests can read it without
/// queueing behind an in-flight refresh.
struct RefreshSlot {
    last_ok: bool,
}

/// Authenticated REST client with the retry-once / refresh-coalescing
/// interceptor.
pub struct ApiClient {
    dispatcher: Arc<dyn HttpDispatch>,
    gate: SessionGate,
    exclusions: RetryExclusions,
    refresh: Mutex<RefreshSlot>,
    refresh_epoch: AtomicU64,
    on_blocked: StdMutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl ApiClient {
    /// Create a client over the given dispatcher and session gate.
    pub fn new(dispatcher: Arc<dyn HttpDispatch>, gate: SessionGate) -> Self {
        Self {
            dispatcher,
            gate,
            exclusions: RetryExclusions::default(),
            refresh: Mutex::new(RefreshSlot { last_ok: false }),
            refresh_epoch: AtomicU64::new(0),
            on_blocked: StdMutex::new(None),
        }
    }

    /// Replace the retry exclusion set.
    pub fn with_exclusions(mut self, exclusions: RetryExclusions) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Register the callback invoked when a blocked account is detected
    /// (the embedding client redirects to its sign-in surface).
    pub fn set_on_blocked(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        *self.on_blocked.lock().unwrap() = Some(callback);
    }

    /// Execute a request under the interceptor policy and return the
    /// response body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest {
            method,
            path: path.to_string(),
            body,
        };
        // The per-request retry marker. Set once, never reset: a request
        // that already replayed must not trigger a second refresh.
        let mut retried = false;

        loop {
            let seen_epoch = self.refresh_epoch.load(Ordering::SeqCst);
            let response = self.dispatcher.dispatch(&request).await?;

            match response.status {
                status if (200..300).contains(&status) => return Ok(response.body),
                401 => {
                    if retried || self.exclusions.excludes(&request.path) {
                        return Err(ApiError::AuthExpired);
                    }
                    self.refresh_once(seen_epoch).await?;
                    retried = true;
                    // Loop around: replay the original request unmodified.
                }
                403 => {
                    if is_blocked(&response.body) {
                        log::warn!("[ApiClient] account blocked, clearing session");
                        self.gate.clear_user();
                        self.notify_blocked();
                        return Err(ApiError::AccountBlocked);
                    }
                    return Err(ApiError::Forbidden);
                }
                status => return Err(ApiError::Status(status)),
            }
        }
    }

    /// Coalesced credential refresh.
    ///
    /// `seen_epoch` is the refresh epoch the caller observed when it
    /// dispatched the request that got the 401. If the epoch has advanced
    /// by the time the refresh lock is acquired, another request already
    /// refreshed on our behalf and we adopt its outcome; otherwise we
    /// perform the one refresh call and publish the result.
    async fn refresh_once(&self, seen_epoch: u64) -> Result<(), ApiError> {
        let mut slot = self.refresh.lock().await;
        if self.refresh_epoch.load(Ordering::SeqCst) != seen_epoch {
            return if slot.last_ok {
                Ok(())
            } else {
                Err(ApiError::RefreshFailed)
            };
        }

        log::info!("[ApiClient] refreshing credentials");
        let refresh = ApiRequest {
            method: Method::Post,
            path: REFRESH_PATH.to_string(),
            body: None,
        };
        let ok = match self.dispatcher.dispatch(&refresh).await {
            Ok(response) => response.is_success(),
            Err(e) => {
                log::error!("[ApiClient] refresh call failed: {}", e);
                false
            }
        };

        slot.last_ok = ok;
        self.refresh_epoch.fetch_add(1, Ordering::SeqCst);
        drop(slot);

        if ok {
            Ok(())
        } else {
            log::warn!("[ApiClient] refresh failed, clearing session");
            self.gate.clear_user();
            Err(ApiError::RefreshFailed)
        }
    }

    fn notify_blocked(&self) {
        let callback = self.on_blocked.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// `GET /auth/me` - the current user. Exempt from the auth-endpoint
    /// retry exclusion.
    pub async fn me(&self) -> Result<User, ApiError> {
        let body = self.request(Method::Get, "/auth/me", None).await?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `GET /chats/{id}/messages` - history fetch for seeding a
    /// conversation channel.
    pub async fn conversation_messages(&self, chat_id: &str) -> Result<Vec<ChatPayload>, ApiError> {
        let body = self
            .request(Method::Get, &format!("/chats/{}/messages", chat_id), None)
            .await?;
        serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `POST /chats/{id}/read` - tell the server these messages were read
    /// (the peer receives a `messages_read` event).
    pub async fn mark_read(&self, chat_id: &str, message_ids: &[String]) -> Result<(), ApiError> {
        self.request(
            Method::Post,
            &format!("/chats/{}/read", chat_id),
            Some(json!({ "messageIds": message_ids })),
        )
        .await
        .map(|_| ())
    }
}

/// Whether a 403 body carries the blocked-account marker.
fn is_blocked(body: &Value) -> bool {
    body.get("message")
        .and_then(Value::as_str)
        .map(|message| message.to_ascii_lowercase().contains(BLOCKED_MARKER))
        .unwrap_or(false)
}
