use async_trait::async_trait;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::warn;

use super::Notification;
use crate::http::{build_headers, TransportError};
use crate::redact::redact_secrets;
use crate::settings::ClientSettings;

pub const NOTIFICATIONS_PATH: &str = "/notifications/stream";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("notification stream rejected the access token")]
    Unauthorized,
    #[error("notification stream unavailable: {0}")]
    Unavailable(String),
}

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Opens a server push connection for one access token.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, access_token: &str) -> Result<Box<dyn PushStream>, ChannelError>;
}

#[async_trait]
pub trait PushStream: Send {
    /// `Ok(None)` once the server closes the stream.
    async fn next_event(&mut self) -> Result<Option<Notification>, ChannelError>;
}

/// Splits a byte stream into newline-delimited JSON notifications.
#[derive(Default)]
pub(crate) struct LineDecoder {
    pending: Vec<u8>,
    ready: VecDeque<Notification>,
}

impl LineDecoder {
    pub(crate) fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    /// Parses whatever is left once the stream ends without a trailing newline.
    pub(crate) fn finish(&mut self) {
        let rest = std::mem::take(&mut self.pending);
        self.push_line(&rest);
    }

    pub(crate) fn pop(&mut self) -> Option<Notification> {
        self.ready.pop_front()
    }

    fn push_line(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match serde_json::from_str::<Notification>(text) {
            Ok(notification) => self.ready.push_back(notification),
            Err(e) => warn!(
                "skipping malformed notification line: {}",
                redact_secrets(&e.to_string())
            ),
        }
    }
}

pub struct HttpPushConnector {
    http: reqwest::Client,
    url: String,
}

impl HttpPushConnector {
    pub fn new(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
        // No overall timeout: the stream stays open for as long as the server keeps it.
        Ok(Self {
            http: reqwest::Client::builder()
                .connect_timeout(settings.connect_timeout())
                .build()?,
            url: settings.api_url(NOTIFICATIONS_PATH),
        })
    }
}

#[async_trait]
impl PushConnector for HttpPushConnector {
    async fn connect(&self, access_token: &str) -> Result<Box<dyn PushStream>, ChannelError> {
        let response = self
            .http
            .get(&self.url)
            .headers(build_headers(Some(access_token)))
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status().as_u16();
        if status == 401 {
            return Err(ChannelError::Unauthorized);
        }
        if !response.status().is_success() {
            return Err(ChannelError::Unavailable(format!("HTTP {status}")));
        }

        Ok(Box::new(HttpPushStream {
            response,
            decoder: LineDecoder::default(),
            closed: false,
        }))
    }
}

struct HttpPushStream {
    response: reqwest::Response,
    decoder: LineDecoder,
    closed: bool,
}

#[async_trait]
impl PushStream for HttpPushStream {
    async fn next_event(&mut self) -> Result<Option<Notification>, ChannelError> {
        loop {
            if let Some(notification) = self.decoder.pop() {
                return Ok(Some(notification));
            }
            if self.closed {
                return Ok(None);
            }
            match self.response.chunk().await.map_err(TransportError::from)? {
                Some(chunk) => self.decoder.feed(&chunk),
                None => {
                    self.closed = true;
                    self.decoder.finish();
                }
            }
        }
    }
}
