// ── Navigation guard ──
//
// Routes carry `{auth, roles}` metadata. The metadata of every matched
// route (parent first) is merged, children overriding parents, and the
// result decides whether a navigation proceeds or goes to the login page.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::form_urlencoded;

use super::auth::AuthService;
use super::profile::ProfileService;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

impl RouteMeta {
    pub fn auth() -> Self {
        Self {
            auth: Some(true),
            roles: None,
        }
    }

    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            auth: Some(true),
            roles: Some(roles.into_iter().map(Into::into).collect()),
        }
    }

    /// Merge a matched chain, parent first. `None` when no route has
    /// metadata.
    pub fn merge(chain: &[Option<RouteMeta>]) -> Option<RouteMeta> {
        chain.iter().flatten().fold(None, |acc: Option<RouteMeta>, meta| {
            Some(match acc {
                None => meta.clone(),
                Some(parent) => RouteMeta {
                    auth: meta.auth.or(parent.auth),
                    roles: meta.roles.clone().or(parent.roles),
                },
            })
        })
    }

    fn requires_auth(&self) -> bool {
        self.auth.unwrap_or(false)
    }
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    /// Go to `path` instead, passing the requested location as `url`.
    Redirect { path: String, url: String },
    /// The guard is paused; the navigation is replayed by `resume`.
    Deferred,
}

impl Navigation {
    /// Redirect target as `path?url=...`.
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Redirect { path, url } => {
                let query: String = form_urlencoded::Serializer::new(String::new())
                    .append_pair("url", url)
                    .finish();
                Some(format!("{path}?{query}"))
            }
            Self::Proceed | Self::Deferred => None,
        }
    }
}

/// Session facts the guard decides on.
pub trait AccessPolicy: Send + Sync {
    fn is_authenticated(&self) -> bool;
    fn is_in_one_of_roles(&self, roles: &[String]) -> bool;
}

/// Policy backed by the live session and profile.
pub struct SessionPolicy {
    auth: AuthService,
    profile: Arc<ProfileService>,
}

impl SessionPolicy {
    pub fn new(auth: AuthService, profile: Arc<ProfileService>) -> Self {
        Self { auth, profile }
    }
}

impl AccessPolicy for SessionPolicy {
    fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    fn is_in_one_of_roles(&self, roles: &[String]) -> bool {
        self.profile.is_in_one_of_roles(roles)
    }
}

#[derive(Debug, Clone)]
pub struct GuardOptions {
    pub home_page: String,
    pub login_page: String,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            home_page: "/".into(),
            login_page: "/login".into(),
        }
    }
}

/// A navigation held while the guard was paused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNavigation {
    pub full_path: String,
    pub matched: Vec<Option<RouteMeta>>,
}

#[derive(Default)]
struct GuardState {
    paused: bool,
    pending: Option<PendingNavigation>,
}

pub struct RouteGuard {
    policy: Arc<dyn AccessPolicy>,
    options: GuardOptions,
    state: Mutex<GuardState>,
}

impl RouteGuard {
    pub fn new(policy: Arc<dyn AccessPolicy>, options: GuardOptions) -> Self {
        Self {
            policy,
            options,
            state: Mutex::new(GuardState::default()),
        }
    }

    pub fn options(&self) -> &GuardOptions {
        &self.options
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().expect("guard lock poisoned")
    }

    /// Decide a navigation to `full_path` whose matched route chain carries
    /// `matched` metadata.
    pub fn check(&self, full_path: &str, matched: &[Option<RouteMeta>]) -> Navigation {
        {
            let mut state = self.state();
            if state.paused {
                // Only the first navigation is replayed.
                if state.pending.is_none() {
                    state.pending = Some(PendingNavigation {
                        full_path: full_path.to_owned(),
                        matched: matched.to_vec(),
                    });
                }
                return Navigation::Deferred;
            }
        }
        self.decide(full_path, matched)
    }

    /// Hold navigations until [`resume`](Self::resume), e.g. while the
    /// session is being restored.
    pub fn pause(&self) {
        self.state().paused = true;
    }

    /// Lift the pause and decide the held navigation, if any.
    pub fn resume(&self) -> Option<(PendingNavigation, Navigation)> {
        let pending = {
            let mut state = self.state();
            state.paused = false;
            state.pending.take()
        }?;
        let decision = self.decide(&pending.full_path, &pending.matched);
        Some((pending, decision))
    }

    fn decide(&self, full_path: &str, matched: &[Option<RouteMeta>]) -> Navigation {
        let Some(meta) = RouteMeta::merge(matched) else {
            return Navigation::Proceed;
        };
        if !meta.requires_auth() {
            return Navigation::Proceed;
        }
        let allowed = self.policy.is_authenticated()
            && meta
                .roles
                .as_deref()
                .is_none_or(|roles| self.policy.is_in_one_of_roles(roles));
        if allowed {
            Navigation::Proceed
        } else {
            debug!(full_path, "navigation requires sign-in");
            Navigation::Redirect {
                path: self.options.login_page.clone(),
                url: full_path.to_owned(),
            }
        }
    }

    /// Where to go after sign-out: the home page when the current route
    /// needs a session.
    pub fn redirect_after_sign_out(&self, current: &[Option<RouteMeta>]) -> Option<String> {
        RouteMeta::merge(current)
            .filter(RouteMeta::requires_auth)
            .map(|_| self.options.home_page.clone())
    }

    /// Login page location returning to `url` (the home page by default).
    pub fn login_location(&self, url: Option<&str>) -> String {
        Navigation::Redirect {
            path: self.options.login_page.clone(),
            url: url.unwrap_or(&self.options.home_page).to_owned(),
        }
        .location()
        .unwrap_or_else(|| self.options.login_page.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakePolicy {
        signed_in: AtomicBool,
        roles: Vec<String>,
    }

    impl AccessPolicy for FakePolicy {
        fn is_authenticated(&self) -> bool {
            self.signed_in.load(Ordering::SeqCst)
        }

        fn is_in_one_of_roles(&self, roles: &[String]) -> bool {
            roles.iter().any(|r| self.roles.contains(r))
        }
    }

    fn guard(signed_in: bool, roles: &[&str]) -> RouteGuard {
        let policy = FakePolicy {
            signed_in: AtomicBool::new(signed_in),
            roles: roles.iter().map(ToString::to_string).collect(),
        };
        RouteGuard::new(Arc::new(policy), GuardOptions::default())
    }

    #[test]
    fn child_metadata_overrides_parent() {
        let merged = RouteMeta::merge(&[
            Some(RouteMeta::roles(["ADMIN"])),
            None,
            Some(RouteMeta {
                auth: Some(false),
                roles: None,
            }),
        ])
        .unwrap();
        assert_eq!(merged.auth, Some(false));
        assert_eq!(merged.roles, Some(vec!["ADMIN".to_owned()]));
        assert_eq!(RouteMeta::merge(&[None, None]), None);
    }

    #[test]
    fn anonymous_users_are_sent_to_login() {
        let guard = guard(false, &[]);
        let decision = guard.check("/orders?page=2", &[Some(RouteMeta::auth())]);
        assert_eq!(
            decision,
            Navigation::Redirect {
                path: "/login".into(),
                url: "/orders?page=2".into(),
            }
        );
        assert_eq!(decision.location().unwrap(), "/login?url=%2Forders%3Fpage%3D2");
        assert_eq!(guard.check("/about", &[None]), Navigation::Proceed);
    }

    #[test]
    fn roles_are_enforced_for_signed_in_users() {
        let guard = guard(true, &["EDITOR"]);
        assert_eq!(
            guard.check("/edit", &[Some(RouteMeta::roles(["EDITOR"]))]),
            Navigation::Proceed
        );
        assert!(matches!(
            guard.check("/admin", &[Some(RouteMeta::roles(["ADMIN"]))]),
            Navigation::Redirect { .. }
        ));
    }

    #[test]
    fn paused_guard_replays_the_first_navigation() {
        let guard = guard(true, &[]);
        guard.pause();
        assert_eq!(guard.check("/first", &[Some(RouteMeta::auth())]), Navigation::Deferred);
        assert_eq!(guard.check("/second", &[]), Navigation::Deferred);

        let (pending, decision) = guard.resume().unwrap();
        assert_eq!(pending.full_path, "/first");
        assert_eq!(decision, Navigation::Proceed);
        assert!(guard.resume().is_none());
    }

    #[test]
    fn sign_out_leaves_protected_routes() {
        let guard = guard(false, &[]);
        assert_eq!(guard.redirect_after_sign_out(&[Some(RouteMeta::auth())]).as_deref(), Some("/"));
        assert_eq!(guard.redirect_after_sign_out(&[None]), None);
        assert_eq!(guard.login_location(None), "/login?url=%2F");
    }
}
