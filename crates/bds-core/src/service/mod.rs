// ── Feature services ──
//
// Each service wraps one backend area. They share the gateway, the live
// configuration and, where the feature is real-time, the hub multiplexer.

pub mod auth;
pub mod blog;
pub mod calendar;
pub mod chat;
pub mod cms;
pub mod commerce;
pub mod forum;
pub mod guard;
pub mod platform;
pub mod profile;
pub mod search;
pub mod translation;

pub use auth::{
    AuthOptions, AuthService, ExternalSignOut, RefreshOutcome, SessionEvent, TokenHolder,
};
pub use blog::BlogService;
pub use calendar::CalendarService;
pub use chat::{ChatEvent, ChatOptions, ChatService, EmojiGroup};
pub use cms::{CatalogChanged, CmsOptions, CmsService, ContentConverter, LoadedContent};
pub use commerce::CommerceService;
pub use forum::ForumService;
pub use guard::{AccessPolicy, GuardOptions, Navigation, RouteGuard, RouteMeta, SessionPolicy};
pub use platform::PlatformService;
pub use profile::{ProfileService, ProfileSnapshot};
pub use search::SearchService;
pub use translation::{LocaleLoader, NoBundles, TranslationOptions, TranslationService};
