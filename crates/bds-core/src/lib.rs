//! Feature services and reactive stores for the BDS client SDK.
//!
//! - **[`App`]**: the root context. [`App::start`] loads the configuration,
//!   builds the gateway and the hub, restores the session and wires the
//!   background bridges. Everything else hangs off it; there are no globals.
//!
//! - **Services** ([`service`]): session and tokens ([`AuthService`]),
//!   profile, CMS content with source fallback, chat, commerce, search,
//!   forum, blog, calendar, platform data, translation and the navigation
//!   guard.
//!
//! - **[`EntityCollection`]**: `DashMap` + `tokio::sync::watch` store used
//!   by services that cache documents (chat channels, countries), vending
//!   [`EntityStream`] subscriptions.
//!
//! - **Domain model** ([`model`]): typed backend documents.

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod service;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use app::{App, AppHooks, AppOptions, DefaultHooks};
pub use config::{ConfigService, ConfigSource};
pub use error::CoreError;
pub use service::{
    AuthService, BlogService, CalendarService, ChatService, CmsService, CommerceService,
    ForumService, PlatformService, ProfileService, RouteGuard, SearchService, SessionEvent,
    TranslationService,
};
pub use store::EntityCollection;
pub use stream::{EntityStream, Snapshot};
