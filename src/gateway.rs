//! Authenticated request gateway.
//!
//! `call_authenticated` is plain composition: send once, and on a 401 ask the
//! session to refresh and send once more. Any other failure goes straight back
//! to the caller.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::http::{ApiRequest, HttpTransport, RawResponse};
use crate::state::{Credentials, SessionManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Retry,
}

#[derive(Clone)]
pub struct Gateway {
    transport: Arc<dyn HttpTransport>,
    session: SessionManager,
}

impl Gateway {
    pub fn new(transport: Arc<dyn HttpTransport>, session: SessionManager) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::post(path, to_json(body)?)).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(ApiRequest::put(path, to_json(body)?)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.call_authenticated(&request).await?.decode()
    }

    /// Current credentials, renewing first when the token's own expiry has passed.
    async fn credentials(&self) -> Credentials {
        let credentials = self.session.credentials().await;
        if credentials.expired != Some(true) {
            return credentials;
        }
        debug!("access token expired before send; refreshing");
        // On failure the session is already torn down and the call goes out bare.
        let _ = self.session.refresh_since(credentials.generation).await;
        self.session.credentials().await
    }

    pub async fn call_raw(
        &self,
        request: &ApiRequest,
        credentials: &Credentials,
        attempt: Attempt,
    ) -> Result<RawResponse, ApiError> {
        debug!(
            method = %request.method,
            path = %request.path,
            ?attempt,
            authenticated = credentials.access_token.is_some(),
            "sending request"
        );
        let response = self
            .transport
            .execute(request, credentials.access_token.as_deref())
            .await?;
        debug!(status = response.status, ?attempt, "response received");
        Ok(response)
    }

    /// Sends `request` with the held access token. At most two attempts are
    /// ever made; only a 401 on the first one leads to a refresh. Once a
    /// retry has been made, any failure of it reports the first 401.
    pub async fn call_authenticated(&self, request: &ApiRequest) -> Result<RawResponse, ApiError> {
        let credentials = self.credentials().await;
        let first = self.call_raw(request, &credentials, Attempt::First).await?;
        if !first.is_unauthorized() {
            return Ok(first);
        }
        let failure = first.error();

        if let Err(err) = self.session.refresh_since(credentials.generation).await {
            debug!(error = %err, "refresh unavailable; returning authorization failure");
            return Err(failure);
        }

        let renewed = self.session.credentials().await;
        let retry = match self.call_raw(request, &renewed, Attempt::Retry).await {
            Ok(retry) => retry,
            Err(err) => {
                debug!(error = %err, "retry failed; returning authorization failure");
                return Err(failure);
            }
        };
        if retry.is_unauthorized() {
            self.session.invalidate_since(renewed.generation).await;
            return Err(failure);
        }
        if !retry.is_success() {
            debug!(status = retry.status, "retry failed; returning authorization failure");
            return Err(failure);
        }
        Ok(retry)
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::Validation {
        message: format!("Request body could not be encoded: {e}"),
    })
}
