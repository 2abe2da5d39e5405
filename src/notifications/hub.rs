use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::channel::{ChannelError, PushConnector, PushStream};
use super::Notification;
use crate::state::SessionManager;
use crate::types::{SessionSnapshot, SessionStatus};

/// Fans out server notifications to any number of subscribers.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Keeps one push connection open while the session is signed in.
    pub fn spawn(
        &self,
        session: SessionManager,
        connector: Arc<dyn PushConnector>,
        policy: ReconnectPolicy,
    ) -> HubHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            self.sender.clone(),
            session,
            connector,
            policy,
            shutdown_rx,
        ));
        HubHandle { shutdown, task }
    }
}

/// Dropping the handle also stops the connection loop.
pub struct HubHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HubHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "notification task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

enum StreamEnd {
    Shutdown,
    SignedOut,
    Closed,
    Failed(ChannelError),
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

async fn run_loop(
    sender: broadcast::Sender<Notification>,
    session: SessionManager,
    connector: Arc<dyn PushConnector>,
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut status = session.subscribe();
    let mut failures: u32 = 0;

    loop {
        if !wait_until_signed_in(&mut status, &mut shutdown).await {
            break;
        }

        let identity = status.borrow().profile.as_ref().map(|p| p.id.clone());
        let credentials = session.credentials().await;
        let Some(token) = credentials.access_token.clone() else {
            debug!("signed in without an access token; waiting");
            failures = failures.saturating_add(1);
            if !pause(&policy, failures, &mut shutdown).await {
                break;
            }
            continue;
        };

        let connected = tokio::select! {
            res = connector.connect(&token) => res,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok(mut stream) => {
                info!("notification stream connected");
                failures = 0;
                let end = pump(
                    &sender,
                    stream.as_mut(),
                    identity.as_deref(),
                    &mut status,
                    &mut shutdown,
                )
                .await;
                match end {
                    StreamEnd::Shutdown => break,
                    StreamEnd::SignedOut => {
                        info!("session ended; notification stream closed");
                        continue;
                    }
                    StreamEnd::Closed => debug!("notification stream closed by server"),
                    StreamEnd::Failed(err) => warn!(error = %err, "notification stream failed"),
                }
            }
            Err(ChannelError::Unauthorized) => {
                debug!("notification stream rejected access token; refreshing");
                if let Err(err) = session.refresh_since(credentials.generation).await {
                    warn!(error = %err, "refresh for notification stream failed");
                }
            }
            Err(err) => warn!(error = %err, "notification stream connect failed"),
        }

        if !pause(&policy, failures, &mut shutdown).await {
            break;
        }
        failures = failures.saturating_add(1);
    }

    debug!("notification loop stopped");
}

/// Returns `false` when the loop should stop instead of connecting.
async fn wait_until_signed_in(
    status: &mut watch::Receiver<SessionSnapshot>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if stop_requested(shutdown) {
            return false;
        }
        let signed_in = status.borrow_and_update().is_authenticated();
        if signed_in {
            return true;
        }
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

async fn pause(
    policy: &ReconnectPolicy,
    failures: u32,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let delay_ms = policy.next_delay_ms(failures);
    debug!(delay_ms, "reconnecting notification stream later");
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        changed = shutdown.changed() => changed.is_ok() && !stop_requested(shutdown),
    }
}

/// Whether `snapshot` still belongs to the session the stream was opened for.
/// A refresh keeps it; a login in progress or a different user ends it.
fn same_session(snapshot: &SessionSnapshot, identity: Option<&str>) -> bool {
    match snapshot.status {
        SessionStatus::Anonymous | SessionStatus::Authenticating => false,
        SessionStatus::Authenticated | SessionStatus::Refreshing => {
            snapshot.profile.as_ref().map(|p| p.id.as_str()) == identity
        }
    }
}

async fn pump(
    sender: &broadcast::Sender<Notification>,
    stream: &mut dyn PushStream,
    identity: Option<&str>,
    status: &mut watch::Receiver<SessionSnapshot>,
    shutdown: &mut watch::Receiver<bool>,
) -> StreamEnd {
    loop {
        tokio::select! {
            event = stream.next_event() => match event {
                Ok(Some(notification)) => {
                    debug!(kind = ?notification.kind, "notification received");
                    // No subscribers is fine; the event is simply dropped.
                    let _ = sender.send(notification);
                }
                Ok(None) => return StreamEnd::Closed,
                Err(err) => return StreamEnd::Failed(err),
            },
            changed = status.changed() => {
                if changed.is_err() {
                    return StreamEnd::SignedOut;
                }
                let signed_out = !same_session(&status.borrow_and_update(), identity);
                if signed_out {
                    return StreamEnd::SignedOut;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || stop_requested(shutdown) {
                    return StreamEnd::Shutdown;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::now_unix;
    use crate::notifications::NotificationKind;
    use crate::state::{MemoryTokenStore, LOGIN_PATH, REFRESH_PATH};
    use crate::testing::{auth_body, jwt, ScriptedTransport};
    use crate::types::{Profile, Role};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    enum Connect {
        Unauthorized,
        Stream(Vec<Notification>),
    }

    #[derive(Default)]
    struct FakeConnector {
        script: Mutex<VecDeque<Connect>>,
        tokens: Mutex<Vec<String>>,
        dropped: Arc<AtomicBool>,
    }

    impl FakeConnector {
        fn with(script: Vec<Connect>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn tokens(&self) -> Vec<String> {
            self.tokens.lock().unwrap().clone()
        }
    }

    /// Yields its events, then stays open until dropped.
    struct FakeStream {
        events: VecDeque<Notification>,
        dropped: Arc<AtomicBool>,
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PushStream for FakeStream {
        async fn next_event(&mut self) -> Result<Option<Notification>, ChannelError> {
            match self.events.pop_front() {
                Some(event) => Ok(Some(event)),
                None => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl PushConnector for FakeConnector {
        async fn connect(&self, access_token: &str) -> Result<Box<dyn PushStream>, ChannelError> {
            self.tokens.lock().unwrap().push(access_token.to_string());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Connect::Unauthorized) => Err(ChannelError::Unauthorized),
                Some(Connect::Stream(events)) => Ok(Box::new(FakeStream {
                    events: events.into(),
                    dropped: self.dropped.clone(),
                })),
                None => Ok(Box::new(FakeStream {
                    events: VecDeque::new(),
                    dropped: Arc::new(AtomicBool::new(false)),
                })),
            }
        }
    }

    fn order_completed(id: &str) -> Notification {
        Notification {
            kind: NotificationKind::OrderCompleted,
            order_id: Some(id.to_string()),
            message: None,
            created_at: None,
        }
    }

    fn session(transport: &Arc<ScriptedTransport>) -> SessionManager {
        SessionManager::new(transport.clone(), Arc::new(MemoryTokenStore::default()), 30)
    }

    async fn wait_for(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn connects_only_after_sign_in_and_delivers_events() {
        let transport = ScriptedTransport::new();
        let access = jwt("u1", "Customer", "Ann", now_unix() + 3600);
        transport.respond(LOGIN_PATH, 200, auth_body(&access, "r1", "u1", "Ann"));
        let session = session(&transport);
        let connector = FakeConnector::with(vec![Connect::Stream(vec![order_completed("42")])]);
        let hub = NotificationHub::new(8);
        let mut rx = hub.subscribe();
        let handle = hub.spawn(session.clone(), connector.clone(), ReconnectPolicy::default());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(connector.tokens().is_empty());

        session.login("a@b.com", "secret").await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(received.order_id.as_deref(), Some("42"));
        assert_eq!(connector.tokens(), vec![access]);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_token_refreshes_then_reconnects() {
        let transport = ScriptedTransport::new();
        let first = jwt("u1", "Customer", "Ann", now_unix() + 3600);
        let second = jwt("u1", "Customer", "Ann", now_unix() + 7200);
        transport.respond(LOGIN_PATH, 200, auth_body(&first, "r1", "u1", "Ann"));
        transport.respond(REFRESH_PATH, 200, auth_body(&second, "r2", "u1", "Ann"));
        let session = session(&transport);
        session.login("a@b.com", "secret").await.unwrap();

        let connector = FakeConnector::with(vec![
            Connect::Unauthorized,
            Connect::Stream(vec![order_completed("7")]),
        ]);
        let hub = NotificationHub::new(8);
        let mut rx = hub.subscribe();
        let handle = hub.spawn(session.clone(), connector.clone(), ReconnectPolicy::default());

        let received = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(received.order_id.as_deref(), Some("7"));
        assert_eq!(connector.tokens(), vec![first, second]);
        assert_eq!(transport.calls_to(REFRESH_PATH), 1);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn logout_closes_the_open_stream() {
        let transport = ScriptedTransport::new();
        let access = jwt("u1", "Customer", "Ann", now_unix() + 3600);
        transport.respond(LOGIN_PATH, 200, auth_body(&access, "r1", "u1", "Ann"));
        let session = session(&transport);
        session.login("a@b.com", "secret").await.unwrap();

        let connector = FakeConnector::with(vec![Connect::Stream(vec![])]);
        let hub = NotificationHub::new(8);
        let handle = hub.spawn(session.clone(), connector.clone(), ReconnectPolicy::default());

        wait_for(|| connector.tokens().len() == 1).await;
        assert!(!connector.dropped.load(Ordering::SeqCst));

        session.logout().await;
        wait_for(|| connector.dropped.load(Ordering::SeqCst)).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.tokens().len(), 1);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_login_reconnects_with_the_new_token() {
        let transport = ScriptedTransport::new();
        let ann = jwt("u1", "Customer", "Ann", now_unix() + 3600);
        let bob = jwt("u2", "Customer", "Bob", now_unix() + 3600);
        transport.respond(LOGIN_PATH, 200, auth_body(&ann, "r1", "u1", "Ann"));
        transport.respond(LOGIN_PATH, 200, auth_body(&bob, "r2", "u2", "Bob"));
        let session = session(&transport);
        session.login("ann@b.com", "secret").await.unwrap();

        let connector = FakeConnector::with(vec![Connect::Stream(vec![])]);
        let hub = NotificationHub::new(8);
        let handle = hub.spawn(session.clone(), connector.clone(), ReconnectPolicy::default());
        wait_for(|| connector.tokens().len() == 1).await;

        session.login("bob@b.com", "secret").await.unwrap();
        wait_for(|| connector.tokens().len() == 2).await;

        assert!(connector.dropped.load(Ordering::SeqCst));
        assert_eq!(connector.tokens(), vec![ann, bob]);
        handle.stop().await;
    }

    #[test]
    fn refresh_keeps_the_stream_but_identity_change_ends_it() {
        let ann = Profile {
            id: "u1".to_string(),
            name: "Ann".to_string(),
            email: None,
            role: Role::Customer,
        };
        let snapshot = |status, profile: &Profile| SessionSnapshot {
            status,
            profile: Some(profile.clone()),
        };
        let bob = Profile {
            id: "u2".to_string(),
            ..ann.clone()
        };

        assert!(same_session(&snapshot(SessionStatus::Refreshing, &ann), Some("u1")));
        assert!(same_session(&snapshot(SessionStatus::Authenticated, &ann), Some("u1")));
        assert!(!same_session(&snapshot(SessionStatus::Authenticating, &ann), Some("u1")));
        assert!(!same_session(&snapshot(SessionStatus::Authenticated, &bob), Some("u1")));
        assert!(!same_session(&SessionSnapshot::anonymous(), Some("u1")));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop_while_waiting_for_sign_in() {
        let transport = ScriptedTransport::new();
        let hub = NotificationHub::new(8);
        let handle = hub.spawn(
            session(&transport),
            FakeConnector::with(vec![]),
            ReconnectPolicy::default(),
        );
        assert!(!handle.is_finished());
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap();
    }
}
