use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::gateway::Gateway;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::notifications::{
  HttpPushConnector, HubHandle, Notification, NotificationHub, PushConnector, ReconnectPolicy,
};
use crate::settings::{ClientSettings, SettingsError};
use crate::state::{KeyringTokenStore, MemoryTokenStore, SessionManager, TokenStore};

const NOTIFICATION_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum ClientBuildError {
  #[error("invalid settings: {0}")]
  Settings(#[from] SettingsError),
  #[error("failed to create HTTP client: {0}")]
  Http(#[from] reqwest::Error),
}

/// Application context: one session, one gateway and the notification hub,
/// all sharing the same transport and token store.
#[derive(Clone)]
pub struct Client {
  settings: ClientSettings,
  session: SessionManager,
  gateway: Gateway,
  push: Arc<dyn PushConnector>,
  hub: NotificationHub,
}

impl Client {
  pub fn build(settings: ClientSettings) -> Result<Self, ClientBuildError> {
    settings.validate()?;
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(&settings)?);
    let push: Arc<dyn PushConnector> = Arc::new(HttpPushConnector::new(&settings)?);
    let store = token_store_for(&settings);
    Ok(Self::from_parts(settings, transport, store, push))
  }

  pub fn from_parts(
    settings: ClientSettings,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    push: Arc<dyn PushConnector>,
  ) -> Self {
    let session = SessionManager::new(transport.clone(), store, settings.expiry_leeway());
    let gateway = Gateway::new(transport, session.clone());
    Self {
      settings,
      session,
      gateway,
      push,
      hub: NotificationHub::new(NOTIFICATION_BUFFER),
    }
  }

  pub fn settings(&self) -> &ClientSettings {
    &self.settings
  }

  pub fn session(&self) -> &SessionManager {
    &self.session
  }

  pub fn gateway(&self) -> &Gateway {
    &self.gateway
  }

  pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
    self.hub.subscribe()
  }

  /// Starts the push connection loop, unless notifications are turned off.
  pub fn start_notifications(&self) -> Option<HubHandle> {
    if !self.settings.notifications_enabled {
      info!("notifications disabled in settings");
      return None;
    }
    Some(self.hub.spawn(
      self.session.clone(),
      self.push.clone(),
      ReconnectPolicy::from_settings(&self.settings),
    ))
  }
}

fn token_store_for(settings: &ClientSettings) -> Arc<dyn TokenStore> {
  if !settings.remember_session {
    return Arc::new(MemoryTokenStore::default());
  }
  let keyring = KeyringTokenStore::new(settings.keyring_service.trim());
  if keyring.is_available() {
    Arc::new(keyring)
  } else {
    warn!("OS keychain/secret service is unavailable; session will not be remembered");
    Arc::new(MemoryTokenStore::default())
  }
}
