// ── Application context ──
//
// `App` wires every service once, in dependency order, and owns the
// background tasks that keep them consistent: the session bridge (the
// profile follows sign-in) and the profile-changed hook. Sign-out clears
// the user's state inline.

use std::sync::{Arc, Mutex};

use bds_api::hub::{AccessTokenSource, hub_url};
use bds_api::{
    ApiClient, CredentialProvider, ErrorSink, GatewaySettings, HubMultiplexer, HubTransport,
    ReconnectPolicy, Scheduler, TokioScheduler, TracingErrorSink, TransportConfig,
    WebSocketHubTransport,
};
use bds_config::ClientStorage;
use bds_config::storage::LANG;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigService, ConfigSource};
use crate::device;
use crate::error::CoreError;
use crate::service::{
    AuthOptions, AuthService, BlogService, CalendarService, ChatOptions, ChatService, CmsOptions,
    CmsService, CommerceService, ForumService, GuardOptions, LocaleLoader, NoBundles,
    PlatformService, ProfileService, ProfileSnapshot, RouteGuard, SearchService, SessionEvent,
    SessionPolicy, TokenHolder, TranslationOptions, TranslationService,
};

// ── Host hooks ───────────────────────────────────────────────────────

/// Integration points for the host application. Every method has a
/// default.
pub trait AppHooks: Send + Sync {
    /// Receives reportable gateway errors.
    fn error_sink(&self) -> Arc<dyn ErrorSink> {
        Arc::new(TracingErrorSink)
    }

    /// Supplies translation bundles.
    fn locale_loader(&self) -> Arc<dyn LocaleLoader> {
        Arc::new(NoBundles)
    }

    /// Called after every profile change, including sign-out.
    fn on_profile_changed(&self, _profile: &ProfileSnapshot) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl AppHooks for DefaultHooks {}

// ── Options ──────────────────────────────────────────────────────────

/// Everything `App::start` needs. Only the configuration source is
/// required.
pub struct AppOptions {
    pub config: ConfigSource,
    pub storage: ClientStorage,
    pub hooks: Arc<dyn AppHooks>,
    /// HTTP settings. Set through [`AppOptions::with_transport`] to apply
    /// the TLS mode to the default hub transport too.
    pub transport: TransportConfig,
    pub hub_transport: Arc<dyn HubTransport>,
    pub scheduler: Arc<dyn Scheduler>,
    pub reconnect: ReconnectPolicy,
    pub auth: AuthOptions,
    pub cms: CmsOptions,
    pub chat: ChatOptions,
    pub translation: TranslationOptions,
    pub guard: GuardOptions,
    /// Ask the backend to localize payloads (`Translation: true`).
    pub apply_translation: bool,
}

impl AppOptions {
    pub fn new(config: impl Into<ConfigSource>) -> Self {
        Self {
            config: config.into(),
            storage: ClientStorage::in_memory(),
            hooks: Arc::new(DefaultHooks),
            transport: TransportConfig::default(),
            hub_transport: Arc::new(WebSocketHubTransport::default()),
            scheduler: Arc::new(TokioScheduler),
            reconnect: ReconnectPolicy::default(),
            auth: AuthOptions::default(),
            cms: CmsOptions::default(),
            chat: ChatOptions::default(),
            translation: TranslationOptions::default(),
            guard: GuardOptions::default(),
            apply_translation: false,
        }
    }

    /// Use `transport` for the gateway and the hub socket alike.
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.hub_transport = Arc::new(WebSocketHubTransport::new(&transport));
        self.transport = transport;
        self
    }
}

// ── App ──────────────────────────────────────────────────────────────

/// The root context. Build it once with [`App::start`] and share it.
pub struct App {
    config: Arc<ConfigService>,
    storage: ClientStorage,
    device_id: String,
    api: Arc<ApiClient>,
    hub: HubMultiplexer,
    auth: AuthService,
    profile: Arc<ProfileService>,
    translation: Arc<TranslationService>,
    cms: CmsService,
    chat: ChatService,
    commerce: CommerceService,
    search: SearchService,
    forum: ForumService,
    blog: BlogService,
    calendar: CalendarService,
    platform: PlatformService,
    guard: RouteGuard,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Initialise everything: configuration, translation, gateway,
    /// profile, session (optionally restored), platform data, locale.
    pub async fn start(options: AppOptions) -> Result<Arc<Self>, CoreError> {
        let AppOptions {
            config: source,
            storage,
            hooks,
            transport,
            hub_transport,
            scheduler,
            reconnect,
            auth: auth_options,
            cms: cms_options,
            chat: chat_options,
            translation: translation_options,
            guard: guard_options,
            apply_translation,
        } = options;

        // Configuration
        let bootstrap = transport.build_client()?;
        let config = Arc::new(ConfigService::load(&source, &bootstrap).await?);
        let current = config.current();
        info!(app_id = %current.app_id, server_url = %current.server_url, "starting");

        // Translation
        let translation = Arc::new(TranslationService::new(
            translation_options,
            hooks.locale_loader(),
        ));
        translation.init(&current).await;

        // Gateway
        let device_id = device::device_id(storage.durable())?;
        let mut settings =
            GatewaySettings::new(&current.server_url, current.app_id.clone(), device_id.clone())?;
        settings.api_token = current.api_token();
        settings.apply_translation = apply_translation;
        let tokens = Arc::new(TokenHolder::new());
        let credentials: Arc<dyn CredentialProvider> = tokens.clone();
        let api = Arc::new(
            ApiClient::new(&settings, &transport)?
                .with_credentials(credentials)
                .with_error_sink(hooks.error_sink()),
        );

        // Hub
        let hub_tokens = Arc::clone(&tokens);
        let token_source: Arc<dyn AccessTokenSource> = Arc::new(move || hub_tokens.access_token());
        let url = hub_url(api.base_url(), &current.app_id, &device_id)?;
        let hub = HubMultiplexer::builder(hub_transport, url)
            .token_source(token_source)
            .scheduler(Arc::clone(&scheduler))
            .policy(reconnect)
            .build();

        // Services
        let profile = Arc::new(ProfileService::new(Arc::clone(&api), Arc::clone(&config)));
        let auth = AuthService::new(
            Arc::clone(&api),
            Arc::clone(&config),
            storage.clone(),
            tokens,
            scheduler,
            auth_options,
        );
        let cms = CmsService::new(
            Arc::clone(&api),
            Arc::clone(&config),
            Arc::clone(&translation),
            hub.clone(),
            cms_options,
        );
        let chat = ChatService::new(Arc::clone(&api), hub.clone(), chat_options);
        let guard = RouteGuard::new(
            Arc::new(SessionPolicy::new(auth.clone(), Arc::clone(&profile))),
            guard_options,
        );

        let app = Arc::new(Self {
            commerce: CommerceService::new(Arc::clone(&api), Arc::clone(&config)),
            search: SearchService::new(Arc::clone(&api)),
            forum: ForumService::new(Arc::clone(&api)),
            blog: BlogService::new(Arc::clone(&api)),
            calendar: CalendarService::new(Arc::clone(&api)),
            platform: PlatformService::new(Arc::clone(&api), Arc::clone(&config)),
            config,
            storage,
            device_id,
            api,
            hub,
            auth,
            profile,
            translation,
            cms,
            chat,
            guard,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        // Bridges run before the session is restored so a restored session
        // loads the profile.
        app.clear_on_sign_out();
        app.spawn_session_bridge();
        app.spawn_profile_hook(hooks);

        // Session
        app.guard.pause();
        app.auth.init().await;

        // Platform data
        if let Err(e) = app.platform.init().await {
            warn!(error = %e, "platform data unavailable");
        }
        app.cms.init();
        app.chat.init().await;

        // Locale
        let locale = app.set_locale(None).await?;
        info!(%locale, authenticated = app.auth.is_authenticated(), "started");
        Ok(app)
    }

    // ── Background tasks ─────────────────────────────────────────────

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().expect("task lock poisoned").push(handle);
    }

    /// Session state that belongs to the signed-in user is dropped inside
    /// `sign_out` itself, so a host may sign the next user in right away.
    fn clear_on_sign_out(&self) {
        let profile = Arc::clone(&self.profile);
        let chat = self.chat.clone();
        let hub = self.hub.clone();
        self.auth.on_sign_out(move || {
            profile.clear_user_profile();
            chat.clear_user();
            hub.disconnect_all();
            debug!("session state cleared");
        });
    }

    fn spawn_session_bridge(&self) {
        let mut events = self.auth.events();
        let profile = Arc::clone(&self.profile);
        let cancel = self.cancel.clone();

        self.track(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(SessionEvent::SignedIn) => {
                            if let Err(e) = profile.load_user_profile().await {
                                warn!(error = %e, "profile load after sign-in failed");
                            }
                        }
                        Ok(SessionEvent::SignedOut) => {}
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "session bridge lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        }));
    }

    fn spawn_profile_hook(&self, hooks: Arc<dyn AppHooks>) {
        let mut profile = self.profile.watch();
        let cancel = self.cancel.clone();

        self.track(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = profile.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = profile.borrow_and_update().clone();
                        hooks.on_profile_changed(&snapshot);
                    }
                }
            }
        }));
    }

    /// Stop background tasks and drop every hub subscription.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.hub.disconnect_all();
        let handles = std::mem::take(&mut *self.tasks.lock().expect("task lock poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
        info!("stopped");
    }

    // ── Locale ───────────────────────────────────────────────────────

    /// Switch to the closest supported locale of `lang`, else of the
    /// persisted `lang`, else the preferred locale. Updates
    /// `Accept-Language` and persists the choice.
    pub async fn set_locale(&self, lang: Option<&str>) -> Result<String, CoreError> {
        let requested = match lang {
            Some(lang) => Some(lang.to_owned()),
            None => self.storage.durable().get(LANG)?,
        };
        let locale = self.translation.set_locale(requested.as_deref()).await;
        self.api.set_accept_language(&locale)?;
        self.storage.durable().set(LANG, &locale)?;
        Ok(locale)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &Arc<ConfigService> {
        &self.config
    }

    pub fn storage(&self) -> &ClientStorage {
        &self.storage
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn hub(&self) -> &HubMultiplexer {
        &self.hub
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn profile(&self) -> &Arc<ProfileService> {
        &self.profile
    }

    pub fn translation(&self) -> &Arc<TranslationService> {
        &self.translation
    }

    pub fn cms(&self) -> &CmsService {
        &self.cms
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn commerce(&self) -> &CommerceService {
        &self.commerce
    }

    pub fn search(&self) -> &SearchService {
        &self.search
    }

    pub fn forum(&self) -> &ForumService {
        &self.forum
    }

    pub fn blog(&self) -> &BlogService {
        &self.blog
    }

    pub fn calendar(&self) -> &CalendarService {
        &self.calendar
    }

    pub fn platform(&self) -> &PlatformService {
        &self.platform
    }

    /// Navigation guard. Paused during start; call
    /// [`RouteGuard::resume`] once the host is ready to route.
    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }
}
