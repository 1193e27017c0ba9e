// ── Domain model ──
//
// Typed shapes of the documents the BDS backend exchanges. JSON is
// camelCase; every field is optional because the backend projects
// documents through `filters` headers and omits what was not asked for.

pub mod account;
pub mod cms;
pub mod cs;
pub mod entity;
pub mod search;
pub mod soc;
pub mod user;

// ── Re-exports ──────────────────────────────────────────────────────
// Flat access: `use bds_core::model::*` gives you everything.

pub use entity::{Asset, BdsEntity, Entity, Meta, Reference, UserEvent};

pub use user::{
    Address, ClientApplicationUserRole, Country, GeoLocation, Phone, SYSADMIN_ROLE,
    TwoFactorAuthentication, User,
};

pub use account::{
    ChangeMe, Challenge, ChallengeMethod, ChallengeRequest, ExternalTokenRequest,
    ForgotPasswordRequest, LoginRequest, NewChallengeRequest, ResetPasswordRequest,
    SendActivationRequest, Token,
};

pub use cms::{Content, ContentMapItem, ContentType, sort_content_map};

pub use soc::{
    Blog, BlogPost, Calendar, CalendarItem, Channel, Message, MessageBody, MessageGroup, Post,
    SocUser, Thread, Topic,
};

pub use cs::{
    Cart, CartLine, Offer, Order, Product, ProductAsset, ProductOffers, ProductOffersResponse,
    ProductQuantity, Review,
};

pub use search::{SearchEntityResponse, SearchItem, SearchParameters, SearchRequest};

pub use bds_config::ContentSource;
