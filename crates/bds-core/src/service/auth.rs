// ── Session and token lifecycle ──
//
// Signs users in, keeps the access token fresh on a timer, persists the
// refresh token for the next start, and announces session changes on a
// broadcast channel. The token itself lives in a `TokenHolder` shared with
// the HTTP gateway (Authorization header) and the hub (access token).

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use bds_api::{ApiClient, CredentialProvider, RequestOptions, Scheduler};
use bds_config::ClientStorage;
use bds_config::storage::{DEVICE_TOKEN, REFRESH_TOKEN};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigService;
use crate::error::CoreError;
use crate::model::account::{RefreshTokenRequest, SignInResponse, TokenBody};
use crate::model::{
    Challenge, ChallengeMethod, ExternalTokenRequest, ForgotPasswordRequest, LoginRequest,
    NewChallengeRequest, ResetPasswordRequest, SendActivationRequest, Token, User,
};

const SIGN_IN_PATH: &str = "api/bds/v1/users/signin";
const REFRESH_PATH: &str = "api/bds/v1/users/token";
const EXTERNAL_TOKEN_PATH: &str = "api/bds/v1/users/externaltoken";
const EXTERNAL_SIGN_IN_PATH: &str = "api/bds/v1/users/externalsignIn";
const CHALLENGE_METHODS_PATH: &str = "api/bds/v1/users/challengemethods";
const CHALLENGE_CODE_PATH: &str = "api/bds/v1/users/challengecode";

/// Refresh delay when neither the token nor the configuration carries a
/// lifetime.
pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(30);

const EVENT_CHANNEL_SIZE: usize = 16;

// ── Public types ─────────────────────────────────────────────────────

/// Session transitions, broadcast to every subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
}

/// What a refresh attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    /// The backend rejected the refresh token; the session was closed.
    SignedOut,
    /// Transient failure; another attempt is scheduled.
    Rescheduled,
    /// Nothing to refresh with.
    NoToken,
    /// The session changed while the request was in flight.
    Superseded,
}

/// Sign-out hook of an external identity provider.
#[async_trait]
pub trait ExternalSignOut: Send + Sync {
    async fn sign_out(&self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthOptions {
    /// Try to restore the previous session from storage during `init`.
    pub refresh_on_init: bool,
}

// ── TokenHolder ──────────────────────────────────────────────────────

/// The current token, readable without locking.
#[derive(Debug, Default)]
pub struct TokenHolder {
    token: ArcSwapOption<Token>,
}

impl TokenHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Token>> {
        self.token.load_full()
    }

    pub fn is_present(&self) -> bool {
        self.token.load().is_some()
    }

    /// Raw access token, as handed to the hub.
    pub fn access_token(&self) -> Option<String> {
        self.token
            .load()
            .as_ref()
            .and_then(|t| t.access_token.as_ref())
            .map(|s| s.expose_secret().to_owned())
    }

    fn refresh_token(&self) -> Option<String> {
        self.token
            .load()
            .as_ref()
            .and_then(|t| t.refresh_token.as_ref())
            .map(|s| s.expose_secret().to_owned())
    }

    fn set(&self, token: Token) {
        self.token.store(Some(Arc::new(token)));
    }

    fn clear(&self) {
        self.token.store(None);
    }
}

impl CredentialProvider for TokenHolder {
    fn authorization(&self) -> Option<String> {
        self.token.load().as_ref().and_then(|t| t.authorization())
    }
}

/// `expires_in / 2`, else half the configured lifetime, else 30 s.
pub fn refresh_delay(expires_in: Option<f64>, fallback_lifetime_secs: Option<u64>) -> Duration {
    if let Some(lifetime) = expires_in
        .filter(|secs| *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    {
        return lifetime / 2;
    }
    match fallback_lifetime_secs {
        Some(secs) if secs > 0 => Duration::from_secs(secs) / 2,
        _ => DEFAULT_REFRESH_DELAY,
    }
}

// ── AuthService ──────────────────────────────────────────────────────

/// Session owner. Cheap to clone.
#[derive(Clone)]
pub struct AuthService {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    api: Arc<ApiClient>,
    config: Arc<ConfigService>,
    storage: ClientStorage,
    tokens: Arc<TokenHolder>,
    scheduler: Arc<dyn Scheduler>,
    options: AuthOptions,
    session: Mutex<SessionState>,
    authenticated: watch::Sender<bool>,
    events: broadcast::Sender<SessionEvent>,
    challenge_methods: RwLock<Vec<ChallengeMethod>>,
    teardown: RwLock<Vec<Teardown>>,
}

type Teardown = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SessionState {
    remember_me: bool,
    /// Cancels the pending refresh timer.
    refresh: Option<CancellationToken>,
    external_sign_out: Option<Arc<dyn ExternalSignOut>>,
}

impl AuthService {
    pub fn new(
        api: Arc<ApiClient>,
        config: Arc<ConfigService>,
        storage: ClientStorage,
        tokens: Arc<TokenHolder>,
        scheduler: Arc<dyn Scheduler>,
        options: AuthOptions,
    ) -> Self {
        let (authenticated, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(AuthInner {
                api,
                config,
                storage,
                tokens,
                scheduler,
                options,
                session: Mutex::new(SessionState::default()),
                authenticated,
                events,
                challenge_methods: RwLock::new(Vec::new()),
                teardown: RwLock::new(Vec::new()),
            }),
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn tokens(&self) -> &Arc<TokenHolder> {
        &self.inner.tokens
    }

    pub fn is_authenticated(&self) -> bool {
        *self.inner.authenticated.borrow()
    }

    pub fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.inner.authenticated.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.tokens.access_token()
    }

    pub fn remember_me(&self) -> bool {
        self.session().remember_me
    }

    /// Methods fetched during `init`.
    pub fn challenge_methods(&self) -> Vec<ChallengeMethod> {
        self.inner
            .challenge_methods
            .read()
            .expect("challenge methods lock poisoned")
            .clone()
    }

    /// Run `f` inside every sign-out that closes a session, before
    /// `SignedOut` is broadcast and before `sign_out` returns.
    pub fn on_sign_out(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner
            .teardown
            .write()
            .expect("teardown lock poisoned")
            .push(Arc::new(f));
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Fetch the challenge methods and, when configured, restore the
    /// previous session. Failures are logged, never returned.
    pub async fn init(&self) {
        let methods = match self.get_challenge_methods().await {
            Ok(methods) => methods,
            Err(e) => {
                debug!(error = %e, "challenge methods unavailable");
                Vec::new()
            }
        };
        *self
            .inner
            .challenge_methods
            .write()
            .expect("challenge methods lock poisoned") = methods;

        if self.inner.options.refresh_on_init {
            if let Err(e) = self.try_auto_auth().await {
                warn!(error = %e, "session restore failed");
            }
        }
    }

    /// Sign in with credentials. The refresh token is persisted durably
    /// when `remember_me`, for the session only otherwise.
    pub async fn sign_in(
        &self,
        mut request: LoginRequest,
        remember_me: bool,
    ) -> Result<(), CoreError> {
        self.session().remember_me = remember_me;
        self.inner.tokens.clear();
        self.inner.authenticated.send_replace(false);

        request.type_name = Some(self.type_name(request.type_name.take())?);
        if let Some(device_token) = self.stored(DEVICE_TOKEN)? {
            request.device_token = Some(device_token);
        }

        let resp = self
            .inner
            .api
            .post::<Option<SignInResponse>, _>(SIGN_IN_PATH, &request, &RequestOptions::default())
            .await?;
        let token = resp
            .into_data()
            .and_then(|r| r.token)
            .ok_or_else(|| CoreError::AuthenticationFailed {
                message: "sign-in response carried no token".into(),
            })?;

        self.accept(token)?;
        info!(user = %request.user_name, "signed in");
        let _ = self.inner.events.send(SessionEvent::SignedIn);
        Ok(())
    }

    /// Close the session: cancel the refresh timer, drop the token and,
    /// unless `keep_storage`, forget the persisted refresh token. `soft`
    /// also signs out of the external identity provider, if any.
    pub async fn sign_out(&self, keep_storage: bool, soft: bool) {
        let external = {
            let mut session = self.session();
            if let Some(refresh) = session.refresh.take() {
                refresh.cancel();
            }
            if soft { session.external_sign_out.clone() } else { None }
        };

        self.inner.tokens.clear();
        if !keep_storage {
            if let Err(e) = self.inner.storage.remove_everywhere(REFRESH_TOKEN) {
                warn!(error = %e, "failed to clear persisted refresh token");
            }
        }
        if let Some(hook) = external {
            hook.sign_out().await;
        }
        if self.inner.authenticated.send_replace(false) {
            let teardown = self.inner.teardown.read().expect("teardown lock poisoned").clone();
            for f in teardown {
                f();
            }
            info!("signed out");
            let _ = self.inner.events.send(SessionEvent::SignedOut);
        }
    }

    /// Restore a session from a persisted refresh token: the durable one
    /// first (which turns remember-me on), then the session one. Returns
    /// `true` when the session was restored.
    pub async fn try_auto_auth(&self) -> Result<bool, CoreError> {
        let durable = self.inner.storage.durable().get(REFRESH_TOKEN)?;
        let remember_me = durable.is_some();
        let refresh_token = match durable {
            Some(token) => Some(token),
            None => self.inner.storage.session().get(REFRESH_TOKEN)?,
        };
        let Some(refresh_token) = refresh_token else {
            debug!("no persisted session");
            return Ok(false);
        };

        self.session().remember_me = remember_me;
        self.inner.tokens.clear();
        self.inner.authenticated.send_replace(false);

        if self.run_refresh(Some(refresh_token), None).await == RefreshOutcome::Refreshed {
            info!("session restored");
            let _ = self.inner.events.send(SessionEvent::SignedIn);
            return Ok(true);
        }
        Ok(false)
    }

    /// Refresh the access token now.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.run_refresh(None, None).await
    }

    // ── External identity providers ──────────────────────────────────

    /// Exchange an external provider token for a session. On failure the
    /// session is closed (persisted tokens kept) and the error returned.
    pub async fn create_token_from_external_provider(
        &self,
        provider: &str,
        token: &str,
        sign_out_hook: Arc<dyn ExternalSignOut>,
    ) -> Result<(), CoreError> {
        self.session().external_sign_out = Some(sign_out_hook);
        match self.exchange_external(EXTERNAL_TOKEN_PATH, provider, token).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.sign_out(true, true).await;
                Err(e)
            }
        }
    }

    /// Sign in with an external provider token.
    pub async fn sign_in_from_external_provider(
        &self,
        provider: &str,
        token: &str,
    ) -> Result<(), CoreError> {
        self.exchange_external(EXTERNAL_SIGN_IN_PATH, provider, token).await
    }

    async fn exchange_external(
        &self,
        path: &str,
        provider: &str,
        token: &str,
    ) -> Result<(), CoreError> {
        let request = ExternalTokenRequest {
            token: token.to_owned(),
            provider: provider.to_owned(),
            device_token: self.stored(DEVICE_TOKEN)?,
            type_name: self.inner.config.current().user_type_name.clone(),
        };
        let resp = self
            .inner
            .api
            .post::<Option<Token>, _>(
                path,
                &request,
                &RequestOptions::new().without_credentials().silent(),
            )
            .await?;
        let token = resp.into_data().ok_or_else(|| CoreError::AuthenticationFailed {
            message: format!("{provider} token exchange returned no token"),
        })?;
        self.accept(token)?;
        info!(provider, "signed in through external provider");
        let _ = self.inner.events.send(SessionEvent::SignedIn);
        Ok(())
    }

    // ── Account operations ───────────────────────────────────────────

    pub async fn get_challenge_methods(&self) -> Result<Vec<ChallengeMethod>, CoreError> {
        let resp = self
            .inner
            .api
            .get::<Option<Vec<ChallengeMethod>>>(
                CHALLENGE_METHODS_PATH,
                &RequestOptions::new().silent(),
            )
            .await?;
        Ok(resp.into_data().unwrap_or_default())
    }

    /// Ask the backend to send a challenge code through `request.method`.
    pub async fn challenge_code(
        &self,
        mut request: NewChallengeRequest,
    ) -> Result<Option<Challenge>, CoreError> {
        request.login.type_name = Some(self.type_name(request.login.type_name.take())?);
        let resp = self
            .inner
            .api
            .post::<Option<Challenge>, _>(CHALLENGE_CODE_PATH, &request, &RequestOptions::default())
            .await?;
        Ok(resp.into_data())
    }

    pub async fn send_activation(
        &self,
        mut request: SendActivationRequest,
    ) -> Result<Value, CoreError> {
        request.type_name = Some(self.type_name(request.type_name.take())?);
        let resp = self
            .inner
            .api
            .post::<Value, _>(
                "api/bds/v1/users/sendactivation",
                &request,
                &RequestOptions::default(),
            )
            .await?;
        Ok(resp.into_data())
    }

    pub async fn forgot_password(
        &self,
        mut request: ForgotPasswordRequest,
    ) -> Result<Value, CoreError> {
        request.type_name = Some(self.type_name(request.type_name.take())?);
        let resp = self
            .inner
            .api
            .post::<Value, _>(
                "api/bds/v1/users/forgotpassword",
                &request,
                &RequestOptions::default(),
            )
            .await?;
        Ok(resp.into_data())
    }

    pub async fn validate_communication_token(
        &self,
        token: &str,
    ) -> Result<Option<User>, CoreError> {
        self.post_token("api/bds/v1/users/validatecommunicationToken", token)
            .await
    }

    pub async fn activation(&self, token: &str) -> Result<Option<User>, CoreError> {
        self.post_token("api/bds/v1/users/activation", token).await
    }

    pub async fn reset_password(
        &self,
        mut request: ResetPasswordRequest,
    ) -> Result<Option<User>, CoreError> {
        if let Some(login) = request.login.as_mut() {
            if login.type_name.is_none() {
                login.type_name.clone_from(&self.inner.config.current().user_type_name);
            }
        }
        let resp = self
            .inner
            .api
            .post::<Option<User>, _>(
                "api/bds/v1/users/resetpassword",
                &request,
                &RequestOptions::default(),
            )
            .await?;
        Ok(resp.into_data())
    }

    async fn post_token(&self, path: &str, token: &str) -> Result<Option<User>, CoreError> {
        let resp = self
            .inner
            .api
            .post::<Option<User>, _>(path, &TokenBody { token }, &RequestOptions::default())
            .await?;
        Ok(resp.into_data())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.inner.session.lock().expect("session lock poisoned")
    }

    /// Explicit type name, else the configured `userTypeName`.
    fn type_name(&self, explicit: Option<String>) -> Result<String, CoreError> {
        explicit
            .or_else(|| self.inner.config.current().user_type_name.clone())
            .ok_or_else(|| CoreError::ValidationFailed {
                message: "typeName is required: pass one or configure userTypeName".into(),
            })
    }

    /// Read a persisted value from the store chosen by remember-me.
    fn stored(&self, key: &str) -> Result<Option<String>, CoreError> {
        let remember_me = self.session().remember_me;
        Ok(self.inner.storage.scoped(remember_me).get(key)?)
    }

    /// Install a fresh token: persist it, mark the session authenticated
    /// and arm the refresh timer.
    fn accept(&self, token: Token) -> Result<(), CoreError> {
        let persisted = self.persist(&token);
        self.inner.tokens.set(token);
        self.inner.authenticated.send_replace(true);
        self.schedule_refresh(None);
        persisted
    }

    fn persist(&self, token: &Token) -> Result<(), CoreError> {
        let remember_me = self.session().remember_me;
        let store = self.inner.storage.scoped(remember_me);
        if let Some(refresh) = &token.refresh_token {
            store.set(REFRESH_TOKEN, refresh.expose_secret())?;
        }
        if let Some(device_token) = &token.device_token {
            store.set(DEVICE_TOKEN, device_token)?;
        }
        Ok(())
    }

    /// Arm the refresh timer, replacing any pending one. `retry_with`
    /// carries the refresh token of a failed attempt that had no session
    /// token to fall back on.
    fn schedule_refresh(&self, retry_with: Option<String>) {
        let delay = refresh_delay(
            self.inner.tokens.current().and_then(|t| t.expires_in),
            self.inner.config.current().refresh_token_time_span_second,
        );
        let cancel = CancellationToken::new();
        if let Some(previous) = self.session().refresh.replace(cancel.clone()) {
            previous.cancel();
        }
        debug!(delay_ms = delay.as_millis(), "token refresh scheduled");

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = this.inner.scheduler.sleep(delay) => {
                    let outcome = this.run_refresh(retry_with, Some(&cancel)).await;
                    debug!(?outcome, "scheduled token refresh finished");
                }
            }
        });
    }

    async fn run_refresh(
        &self,
        explicit: Option<String>,
        guard: Option<&CancellationToken>,
    ) -> RefreshOutcome {
        let Some(refresh_token) = explicit.or_else(|| self.inner.tokens.refresh_token()) else {
            debug!("no refresh token available");
            return RefreshOutcome::NoToken;
        };
        let device_token = self.stored(DEVICE_TOKEN).unwrap_or_else(|e| {
            warn!(error = %e, "device token unreadable");
            None
        });
        let request = RefreshTokenRequest {
            refresh_token: refresh_token.clone(),
            device_token,
        };

        let result = self
            .inner
            .api
            .post::<Option<Token>, _>(
                REFRESH_PATH,
                &request,
                &RequestOptions::new().without_credentials().silent(),
            )
            .await;

        if guard.is_some_and(CancellationToken::is_cancelled) {
            debug!("session changed during refresh, discarding result");
            return RefreshOutcome::Superseded;
        }

        match result {
            Ok(resp) => {
                if let Some(token) = resp.into_data() {
                    if let Err(e) = self.accept(token) {
                        warn!(error = %e, "failed to persist refreshed token");
                    }
                    debug!("access token refreshed");
                    RefreshOutcome::Refreshed
                } else {
                    warn!("refresh returned no token, retrying");
                    self.schedule_refresh(Some(refresh_token));
                    RefreshOutcome::Rescheduled
                }
            }
            Err(e) if e.is_auth_rejection() => {
                info!(status = ?e.status(), "refresh token rejected, signing out");
                self.sign_out(false, true).await;
                RefreshOutcome::SignedOut
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, retrying");
                self.schedule_refresh(Some(refresh_token));
                RefreshOutcome::Rescheduled
            }
        }
    }
}
