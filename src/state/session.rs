//! Session lifecycle: login, startup restore, refresh and logout.
//!
//! All reads and writes of the token pair go through the [`TokenStore`] port.
//! Every change to the held pair bumps a generation counter; callers that saw
//! an older generation never trigger a second refresh exchange, they get the
//! outcome of the one that already happened.

use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::token_store::TokenStore;
use crate::claims::{decode_claims, token_expired};
use crate::error::ApiError;
use crate::http::{ApiRequest, HttpTransport};
use crate::redact::redact_secrets;
use crate::types::{AuthPayload, Profile, SessionSnapshot, SessionStatus, TokenPair};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";

pub type Generation = u64;

/// The bearer token a request should carry, tagged with the generation it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub generation: Generation,
    pub access_token: Option<String>,
    /// `Some(true)` once the token's own `exp` claim has passed.
    pub expired: Option<bool>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("generation", &self.generation)
            .field("access_token", &self.access_token.as_ref().map(|_| "REDACTED"))
            .field("expired", &self.expired)
            .finish()
    }
}

type RefreshOutcome = Result<Profile, ApiError>;

struct SessionState {
    status: SessionStatus,
    tokens: Option<TokenPair>,
    profile: Option<Profile>,
    generation: Generation,
    last_refresh: Option<(Generation, RefreshOutcome)>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            profile: self.profile.clone(),
        }
    }

    fn refresh_token(&self) -> Option<String> {
        self.tokens
            .as_ref()
            .map(|t| t.refresh_token.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// What a caller that lost the race to a newer generation should see.
    /// Only a refresh of the caller's own session counts; a logout or a new
    /// login in between means that session is gone.
    fn settled_outcome(&self) -> RefreshOutcome {
        match &self.last_refresh {
            Some((generation, outcome)) if *generation == self.generation => outcome.clone(),
            _ => Err(ApiError::session_expired("Session is no longer active.")),
        }
    }
}

/// Owns the one authoritative session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    state: Arc<Mutex<SessionState>>,
    refresh_flight: Arc<Mutex<()>>,
    events: Arc<watch::Sender<SessionSnapshot>>,
    expiry_leeway_seconds: i64,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        expiry_leeway_seconds: i64,
    ) -> Self {
        let (events, _) = watch::channel(SessionSnapshot::anonymous());
        Self {
            transport,
            store,
            state: Arc::new(Mutex::new(SessionState {
                status: SessionStatus::Anonymous,
                tokens: None,
                profile: None,
                generation: 0,
                last_refresh: None,
            })),
            refresh_flight: Arc::new(Mutex::new(())),
            events: Arc::new(events),
            expiry_leeway_seconds,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.state.lock().await.profile.clone()
    }

    pub async fn generation(&self) -> Generation {
        self.state.lock().await.generation
    }

    pub async fn access_token(&self) -> Option<String> {
        self.credentials().await.access_token
    }

    pub async fn credentials(&self) -> Credentials {
        let state = self.state.lock().await;
        let access_token = state
            .tokens
            .as_ref()
            .map(|t| t.access_token.trim().to_string())
            .filter(|t| !t.is_empty());
        let expired = access_token
            .as_deref()
            .and_then(|t| token_expired(t, self.expiry_leeway_seconds));
        Credentials {
            generation: state.generation,
            access_token,
            expired,
        }
    }

    fn publish(&self, state: &SessionState) {
        self.events.send_replace(state.snapshot());
    }

    /// Drops tokens from memory and storage in one step under the state lock.
    fn teardown(&self, state: &mut SessionState) {
        if state.tokens.take().is_some() {
            state.generation += 1;
        }
        state.profile = None;
        state.status = SessionStatus::Anonymous;
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear stored session tokens");
        }
        self.publish(state);
    }

    fn install(&self, state: &mut SessionState, payload: AuthPayload) -> Result<Profile, ApiError> {
        let pair = payload.token_pair();
        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(ApiError::Malformed("token pair is incomplete".to_string()));
        }
        self.store.save(&pair)?;
        state.tokens = Some(pair);
        state.profile = Some(payload.profile.clone());
        state.status = SessionStatus::Authenticated;
        state.generation += 1;
        self.publish(state);
        Ok(payload.profile)
    }

    async fn exchange<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let raw = self.transport.execute(request, None).await?;
        raw.decode()
    }

    /// Restores the session persisted by a previous run.
    pub async fn init(&self) -> SessionSnapshot {
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(err) => {
                warn!(error = %err, "could not read stored session tokens");
                None
            }
        };

        let observed = {
            let mut state = self.state.lock().await;
            if state.status != SessionStatus::Anonymous {
                return state.snapshot();
            }
            let Some(pair) = stored else {
                self.teardown(&mut state);
                info!("no stored session");
                return state.snapshot();
            };

            let claims = decode_claims(&pair.access_token)
                .ok()
                .filter(|claims| !claims.is_expired(self.expiry_leeway_seconds));
            state.tokens = Some(pair);
            state.generation += 1;

            if let Some(claims) = claims {
                state.profile = Some(claims.profile());
                state.status = SessionStatus::Authenticated;
                self.publish(&state);
                info!(user = %claims.sub, "restored session from stored access token");
                return state.snapshot();
            }
            state.generation
        };

        debug!("stored access token missing or expired; refreshing");
        if let Err(err) = self.refresh_since(observed).await {
            info!(error = %err, "could not restore session");
        }
        self.snapshot().await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Profile, ApiError> {
        let email = validate_credentials(email, password)?;

        let previous = {
            let mut state = self.state.lock().await;
            let previous = state.status;
            state.status = SessionStatus::Authenticating;
            self.publish(&state);
            previous
        };

        let request = ApiRequest::post(LOGIN_PATH, json!({ "email": email, "password": password }));
        let result = self.exchange::<AuthPayload>(&request).await;

        let mut state = self.state.lock().await;
        let outcome = result.and_then(|payload| self.install(&mut state, payload));
        match &outcome {
            Ok(profile) => {
                state.last_refresh = None;
                info!(user = %profile.id, "logged in");
            }
            Err(err) => {
                if state.status == SessionStatus::Authenticating {
                    state.status = previous;
                    self.publish(&state);
                }
                warn!(error = %err, "login failed");
            }
        }
        outcome
    }

    pub async fn refresh(&self) -> Result<Profile, ApiError> {
        let observed = self.generation().await;
        self.refresh_since(observed).await
    }

    /// Refreshes the pair the caller observed at `observed`. Overlapping calls
    /// are single-flighted: only the first performs the exchange.
    pub async fn refresh_since(&self, observed: Generation) -> Result<Profile, ApiError> {
        let _flight = self.refresh_flight.lock().await;

        let refresh_token = {
            let mut state = self.state.lock().await;
            if state.generation != observed {
                debug!(observed, current = state.generation, "refresh already settled");
                return state.settled_outcome();
            }
            let Some(token) = state.refresh_token() else {
                let err = ApiError::session_expired("No refresh token is available.");
                self.teardown(&mut state);
                state.last_refresh = Some((state.generation, Err(err.clone())));
                return Err(err);
            };
            state.status = SessionStatus::Refreshing;
            self.publish(&state);
            token
        };

        let request = ApiRequest::post(REFRESH_PATH, json!({ "refreshToken": refresh_token }));
        let result = self.exchange::<AuthPayload>(&request).await;

        let mut state = self.state.lock().await;
        if state.generation != observed {
            // Logged out (or in again) while the exchange was in flight.
            return state.settled_outcome();
        }
        let installed = result.and_then(|payload| self.install(&mut state, payload));
        let outcome = match installed {
            Ok(profile) => {
                info!(user = %profile.id, "session refreshed");
                Ok(profile)
            }
            Err(err) => {
                let reason = redact_secrets(&err.to_string()).to_string();
                warn!(error = %reason, "session refresh failed; logging out");
                self.teardown(&mut state);
                Err(ApiError::session_expired(reason))
            }
        };
        state.last_refresh = Some((state.generation, outcome.clone()));
        outcome
    }

    /// Ends the session if it is still the one a rejected request used.
    pub async fn invalidate_since(&self, observed: Generation) {
        let mut state = self.state.lock().await;
        if state.generation == observed && state.tokens.is_some() {
            warn!("renewed credentials were rejected; ending session");
            self.teardown(&mut state);
        }
    }

    pub async fn logout(&self) {
        let mut state = self.state.lock().await;
        self.teardown(&mut state);
        state.last_refresh = None;
        info!("logged out");
    }
}

fn validate_credentials<'a>(email: &'a str, password: &str) -> Result<&'a str, ApiError> {
    let email = email.trim();
    let valid_email = email
        .split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && !domain.is_empty());
    if !valid_email {
        return Err(ApiError::Validation {
            message: "Enter a valid email address.".to_string(),
        });
    }
    if password.is_empty() {
        return Err(ApiError::Validation {
            message: "Password is required.".to_string(),
        });
    }
    Ok(email)
}
