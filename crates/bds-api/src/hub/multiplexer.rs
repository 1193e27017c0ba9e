//! Connection multiplexer over a single hub connection.
//!
//! Many logical subscription keys share one persistent connection. The
//! multiplexer owns the ordered key set, a background connection loop and
//! the listener registry:
//!
//! - the first [`subscribe`](HubMultiplexer::subscribe) starts the loop;
//! - every successful handshake announces the full key set, in order,
//!   exactly once, while holding the same lock that guards set mutations;
//! - a failed handshake waits [`ReconnectPolicy::retry_delay`] and tries
//!   again, forever, until stopped;
//! - a closed connection reconnects immediately;
//! - removing the last key, or [`disconnect_all`](HubMultiplexer::disconnect_all),
//!   stops the loop.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexSet;
use serde_json::Value;
use strum::{Display, EnumString};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::listeners::{HandlerError, ListenerId, ListenerRegistry};
use super::transport::{AccessTokenSource, HubEvent, HubInvocation, HubSession, HubTransport};
use crate::schedule::{ReconnectPolicy, Scheduler, TokioScheduler};

// ── HubState ─────────────────────────────────────────────────────────

/// Lifecycle of the shared hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HubState {
    /// No connection has ever been requested.
    Absent,
    /// A handshake is in progress or a retry is pending.
    Connecting,
    Connected,
    /// The transport closed; a new handshake starts immediately.
    Disconnected,
    /// Stopped by sign-out or by removing the last key.
    Stopped,
}

// ── Builder ──────────────────────────────────────────────────────────

pub struct HubMultiplexerBuilder {
    transport: Arc<dyn HubTransport>,
    url: Url,
    tokens: Arc<dyn AccessTokenSource>,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconnectPolicy,
}

impl HubMultiplexerBuilder {
    /// Token factory evaluated at every (re)connect attempt.
    pub fn token_source(mut self, tokens: Arc<dyn AccessTokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> HubMultiplexer {
        let (state, _) = watch::channel(HubState::Absent);
        HubMultiplexer {
            inner: Arc::new(Inner {
                transport: self.transport,
                url: self.url,
                tokens: self.tokens,
                scheduler: self.scheduler,
                policy: self.policy,
                shared: Mutex::new(Shared::default()),
                listeners: ListenerRegistry::default(),
                state,
            }),
        }
    }
}

// ── HubMultiplexer ───────────────────────────────────────────────────

/// Handle to the shared hub connection. Cheap to clone.
#[derive(Clone)]
pub struct HubMultiplexer {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn HubTransport>,
    url: Url,
    tokens: Arc<dyn AccessTokenSource>,
    scheduler: Arc<dyn Scheduler>,
    policy: ReconnectPolicy,
    shared: Mutex<Shared>,
    listeners: ListenerRegistry,
    state: watch::Sender<HubState>,
}

#[derive(Default)]
struct Shared {
    keys: IndexSet<String>,
    /// Outbound channel of the live session; `Some` only while connected.
    link: Option<mpsc::UnboundedSender<HubInvocation>>,
    /// Cancellation handle of the running connection loop.
    task: Option<CancellationToken>,
}

impl HubMultiplexer {
    pub fn builder(transport: Arc<dyn HubTransport>, url: Url) -> HubMultiplexerBuilder {
        HubMultiplexerBuilder {
            transport,
            url,
            tokens: Arc::new(|| None::<String>),
            scheduler: Arc::new(TokioScheduler),
            policy: ReconnectPolicy::default(),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Add a key. Starts the connection when none is running; announces
    /// the key alone when already connected. Known keys are ignored.
    pub fn subscribe(&self, key: impl Into<String>) {
        let key = key.into();
        let mut shared = self.inner.lock();

        if !shared.keys.insert(key.clone()) {
            tracing::trace!(key, "Already subscribed");
            return;
        }
        tracing::debug!(key, "Hub subscribe");

        if let Some(link) = &shared.link {
            send(link, HubInvocation::Connect(key));
        }
        if shared.task.is_none() {
            self.start_locked(&mut shared);
        }
    }

    /// Remove a key. Sends `Disconnect` when connected; stops the
    /// connection when the set becomes empty. Unknown keys are ignored.
    pub fn unsubscribe(&self, key: &str) {
        let mut shared = self.inner.lock();

        if !shared.keys.shift_remove(key) {
            return;
        }
        tracing::debug!(key, "Hub unsubscribe");

        if let Some(link) = &shared.link {
            send(link, HubInvocation::Disconnect(key.to_owned()));
        }
        if shared.keys.is_empty() {
            self.inner.stop_locked(&mut shared);
        }
    }

    /// Fire-and-forget application message. Dropped when not connected.
    pub fn relay(&self, key: &str, method: &str, payload: Value) {
        let shared = self.inner.lock();
        match &shared.link {
            Some(link) => send(
                link,
                HubInvocation::Message {
                    key: key.to_owned(),
                    method: method.to_owned(),
                    payload,
                },
            ),
            None => tracing::debug!(key, method, "Hub not connected, message dropped"),
        }
    }

    /// Clear every key and stop the connection (sign-out).
    pub fn disconnect_all(&self) {
        let mut shared = self.inner.lock();
        shared.keys.clear();
        self.inner.stop_locked(&mut shared);
    }

    /// Current keys, in subscription order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.lock().keys.iter().cloned().collect()
    }

    pub fn is_subscribed(&self, key: &str) -> bool {
        self.inner.lock().keys.contains(key)
    }

    // ── Listeners ────────────────────────────────────────────────────

    /// Register a handler for a server-pushed event name.
    pub fn on<F, Fut>(&self, event: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(HubEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.inner.listeners.on(event, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.off(id)
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn state(&self) -> HubState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<HubState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().link.is_some()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn start_locked(&self, shared: &mut Shared) {
        let cancel = CancellationToken::new();
        shared.task = Some(cancel.clone());
        self.inner.set_state(HubState::Connecting);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(connection_loop(inner, cancel));
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().expect("hub state lock poisoned")
    }

    fn set_state(&self, next: HubState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::debug!(from = %current, to = %next, "Hub state");
                *current = next;
                true
            }
        });
    }

    fn stop_locked(&self, shared: &mut Shared) {
        if let Some(cancel) = shared.task.take() {
            cancel.cancel();
        }
        shared.link = None;
        self.set_state(HubState::Stopped);
    }

    /// Publish a new session: announce the current key set, in order, and
    /// mark the multiplexer connected. Returns `false` if the loop was
    /// stopped in the meantime.
    fn attach(
        &self,
        cancel: &CancellationToken,
        outbound: mpsc::UnboundedSender<HubInvocation>,
    ) -> bool {
        let mut shared = self.lock();
        if cancel.is_cancelled() {
            return false;
        }
        for key in &shared.keys {
            send(&outbound, HubInvocation::Connect(key.clone()));
        }
        shared.link = Some(outbound);
        self.set_state(HubState::Connected);
        true
    }

    fn transition(&self, cancel: &CancellationToken, next: HubState) -> bool {
        let mut shared = self.lock();
        if cancel.is_cancelled() {
            return false;
        }
        if next != HubState::Connected {
            shared.link = None;
        }
        self.set_state(next);
        true
    }
}

fn send(link: &mpsc::UnboundedSender<HubInvocation>, invocation: HubInvocation) {
    if link.send(invocation).is_err() {
        tracing::debug!("Hub session already closed, invocation dropped");
    }
}

// ── Connection loop ──────────────────────────────────────────────────

/// connect → announce → read until closed → reconnect; on a failed
/// handshake wait the fixed delay first.
async fn connection_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        if !inner.transition(&cancel, HubState::Connecting) {
            break;
        }

        let token = inner.tokens.access_token();
        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = inner.transport.start(inner.url.clone(), token) => result,
        };

        match attempt {
            Ok(session) => {
                let HubSession {
                    outbound,
                    mut inbound,
                    shutdown,
                } = session;

                if !inner.attach(&cancel, outbound) {
                    shutdown.cancel();
                    break;
                }
                tracing::info!(url = %inner.url.path(), "Hub session established");

                let stopped = loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break true,
                        event = inbound.recv() => match event {
                            Some(event) => {
                                inner.listeners.dispatch(&event);
                            }
                            None => break false,
                        },
                    }
                };

                shutdown.cancel();
                if stopped || !inner.transition(&cancel, HubState::Disconnected) {
                    break;
                }
                tracing::info!("Hub connection closed, reconnecting");
            }
            Err(e) => {
                let delay = inner.policy.retry_delay;
                tracing::warn!(
                    error = %e,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Hub handshake failed, retrying"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = inner.scheduler.sleep(delay) => {}
                }
            }
        }
    }

    tracing::debug!("Hub connection loop exiting");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::error::Error;

    // ── Fakes ────────────────────────────────────────────────────────

    /// Server side of an in-memory session.
    struct FakeServer {
        received: mpsc::UnboundedReceiver<HubInvocation>,
        push: mpsc::UnboundedSender<HubEvent>,
        shutdown: CancellationToken,
    }

    impl FakeServer {
        fn drain(&mut self) -> Vec<HubInvocation> {
            let mut out = Vec::new();
            while let Ok(inv) = self.received.try_recv() {
                out.push(inv);
            }
            out
        }
    }

    /// Handshake outcomes are scripted; anything past the script succeeds.
    struct FakeTransport {
        script: Mutex<VecDeque<bool>>,
        attempts: AtomicUsize,
        tokens_seen: Mutex<Vec<Option<String>>>,
        servers: mpsc::UnboundedSender<FakeServer>,
    }

    impl FakeTransport {
        fn new(script: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
            let (servers, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                attempts: AtomicUsize::new(0),
                tokens_seen: Mutex::new(Vec::new()),
                servers,
            });
            (transport, rx)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HubTransport for FakeTransport {
        async fn start(
            &self,
            _url: Url,
            access_token: Option<String>,
        ) -> Result<HubSession, Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.tokens_seen.lock().unwrap().push(access_token);

            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if !ok {
                return Err(Error::HubConnect("refused".into()));
            }

            let (outbound, received) = mpsc::unbounded_channel();
            let (push, inbound) = mpsc::unbounded_channel();
            let shutdown = CancellationToken::new();
            let _ = self.servers.send(FakeServer {
                received,
                push,
                shutdown: shutdown.clone(),
            });
            Ok(HubSession {
                outbound,
                inbound,
                shutdown,
            })
        }
    }

    /// Records every requested delay and blocks until released.
    struct RecordingScheduler {
        delays: Mutex<Vec<Duration>>,
        gate: Semaphore,
    }

    impl Default for RecordingScheduler {
        fn default() -> Self {
            Self {
                delays: Mutex::default(),
                gate: Semaphore::new(0),
            }
        }
    }

    impl RecordingScheduler {
        fn delays(&self) -> Vec<Duration> {
            self.delays.lock().unwrap().clone()
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
            self.gate.acquire().await.unwrap().forget();
        }
    }

    fn multiplexer(
        transport: Arc<FakeTransport>,
        scheduler: Arc<RecordingScheduler>,
    ) -> HubMultiplexer {
        HubMultiplexer::builder(transport, Url::parse("https://api.example.com/hubs/bds").unwrap())
            .scheduler(scheduler)
            .build()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn wait_state(mux: &HubMultiplexer, target: HubState) {
        let mut rx = mux.watch_state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached in time")
            .unwrap();
    }

    async fn next_server(servers: &mut mpsc::UnboundedReceiver<FakeServer>) -> FakeServer {
        tokio::time::timeout(Duration::from_secs(2), servers.recv())
            .await
            .expect("no session opened")
            .unwrap()
    }

    fn connect(key: &str) -> HubInvocation {
        HubInvocation::Connect(key.into())
    }

    // ── Properties ───────────────────────────────────────────────────

    #[tokio::test]
    async fn keys_added_while_disconnected_are_announced_once_in_order() {
        let (transport, mut servers) = FakeTransport::new(&[false]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(Arc::clone(&transport), Arc::clone(&scheduler));

        mux.subscribe("A");
        eventually(|| scheduler.delays().len() == 1).await;
        mux.subscribe("B");
        scheduler.release();

        let mut server = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;
        assert_eq!(server.drain(), vec![connect("A"), connect("B")]);

        mux.subscribe("A");
        mux.subscribe("C");
        eventually(|| !server.received.is_empty()).await;
        assert_eq!(server.drain(), vec![connect("C")]);
    }

    #[tokio::test]
    async fn duplicate_subscribe_announces_once() {
        let (transport, mut servers) = FakeTransport::new(&[]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(transport, scheduler);

        mux.subscribe("k");
        mux.subscribe("k");

        let mut server = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;
        mux.subscribe("k");

        assert_eq!(server.drain(), vec![connect("k")]);
        assert_eq!(mux.subscriptions(), vec!["k".to_owned()]);
    }

    #[tokio::test]
    async fn failed_handshake_schedules_one_fixed_delay_retry() {
        let (transport, mut servers) = FakeTransport::new(&[false, false]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(Arc::clone(&transport), Arc::clone(&scheduler));

        mux.subscribe("A");
        eventually(|| scheduler.delays().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.attempts(), 1, "no second handshake before the delay elapses");
        assert_eq!(mux.state(), HubState::Connecting);

        scheduler.release();
        eventually(|| scheduler.delays().len() == 2).await;
        assert_eq!(transport.attempts(), 2);
        assert_eq!(scheduler.delays(), vec![Duration::from_secs(5); 2]);

        scheduler.release();
        let _server = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test]
    async fn removing_last_key_stops_without_further_attempts() {
        let (transport, mut servers) = FakeTransport::new(&[]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(Arc::clone(&transport), scheduler);

        mux.subscribe("A");
        let mut server = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;

        mux.unsubscribe("missing");
        mux.unsubscribe("A");
        assert_eq!(mux.state(), HubState::Stopped);
        assert_eq!(server.drain(), vec![connect("A"), HubInvocation::Disconnect("A".into())]);

        eventually(|| server.shutdown.is_cancelled()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.attempts(), 1);
        assert_eq!(mux.state(), HubState::Stopped);
    }

    #[tokio::test]
    async fn stopping_during_retry_cancels_the_pending_attempt() {
        let (transport, _servers) = FakeTransport::new(&[false]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(Arc::clone(&transport), Arc::clone(&scheduler));

        mux.subscribe("A");
        eventually(|| scheduler.delays().len() == 1).await;
        mux.unsubscribe("A");
        scheduler.release();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.attempts(), 1);
        assert_eq!(mux.state(), HubState::Stopped);
    }

    #[tokio::test]
    async fn closed_connection_reconnects_immediately_and_reannounces() {
        let (transport, mut servers) = FakeTransport::new(&[]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(Arc::clone(&transport), Arc::clone(&scheduler));

        mux.subscribe("A");
        mux.subscribe("B");
        let first = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;

        // Server-side close: dropping the push sender closes the inbound channel.
        drop(first);

        let mut second = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;
        assert_eq!(second.drain(), vec![connect("A"), connect("B")]);
        assert!(scheduler.delays().is_empty(), "close must not wait for the retry delay");
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn relay_is_dropped_unless_connected() {
        let (transport, mut servers) = FakeTransport::new(&[false]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(transport, Arc::clone(&scheduler));

        mux.relay("A", "Typing", json!({}));
        mux.subscribe("A");
        eventually(|| scheduler.delays().len() == 1).await;
        mux.relay("A", "Typing", json!({"early": true}));
        scheduler.release();

        let mut server = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;
        mux.relay("A", "Typing", json!({"n": 1}));

        assert_eq!(
            server.drain(),
            vec![
                connect("A"),
                HubInvocation::Message {
                    key: "A".into(),
                    method: "Typing".into(),
                    payload: json!({"n": 1}),
                },
            ]
        );
    }

    #[tokio::test]
    async fn events_reach_listeners_and_bad_listeners_are_isolated() {
        let (transport, mut servers) = FakeTransport::new(&[]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(transport, scheduler);
        let (tx, mut rx) = mpsc::unbounded_channel();

        mux.on("RefreshChats", |_| async { Err::<(), HandlerError>("listener failed".into()) });
        mux.on("RefreshChats", move |event| {
            let tx = tx.clone();
            async move {
                tx.send(event.str_arg(0).map(str::to_owned)).unwrap();
                Ok(())
            }
        });

        mux.subscribe("chat-1");
        let server = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;

        server.push.send(HubEvent::new("RefreshChats", vec![json!("chat-1")])).unwrap();
        server.push.send(HubEvent::new("RefreshChats", vec![json!("chat-2")])).unwrap();

        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("chat-1"));
        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("chat-2"));
    }

    #[tokio::test]
    async fn disconnect_all_clears_keys_and_stops() {
        let (transport, mut servers) = FakeTransport::new(&[]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let mux = multiplexer(Arc::clone(&transport), scheduler);

        mux.subscribe("A");
        mux.subscribe("B");
        let server = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;

        mux.disconnect_all();
        assert!(mux.subscriptions().is_empty());
        assert_eq!(mux.state(), HubState::Stopped);
        eventually(|| server.shutdown.is_cancelled()).await;

        // A later subscribe starts a fresh connection with only the new key.
        mux.subscribe("C");
        let mut fresh = next_server(&mut servers).await;
        wait_state(&mux, HubState::Connected).await;
        assert_eq!(fresh.drain(), vec![connect("C")]);
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn token_is_read_at_every_attempt() {
        let (transport, mut servers) = FakeTransport::new(&[false]);
        let scheduler = Arc::new(RecordingScheduler::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let source = {
            let counter = Arc::clone(&counter);
            move || Some(format!("tok-{}", counter.fetch_add(1, Ordering::SeqCst)))
        };
        let mux = HubMultiplexer::builder(
            Arc::clone(&transport) as Arc<dyn HubTransport>,
            Url::parse("https://api.example.com/hubs/bds").unwrap(),
        )
        .token_source(Arc::new(source))
        .scheduler(Arc::clone(&scheduler) as Arc<dyn Scheduler>)
        .build();

        mux.subscribe("A");
        eventually(|| scheduler.delays().len() == 1).await;
        scheduler.release();
        let _server = next_server(&mut servers).await;

        assert_eq!(
            *transport.tokens_seen.lock().unwrap(),
            vec![Some("tok-0".to_owned()), Some("tok-1".to_owned())]
        );
    }
}
