// ── Signed-in user profile ──

use std::sync::Arc;

use bds_api::{ApiClient, RequestOptions};
use tokio::sync::watch;
use tracing::debug;

use crate::config::ConfigService;
use crate::error::CoreError;
use crate::model::{ChallengeRequest, ChangeMe, Phone, SYSADMIN_ROLE, TwoFactorAuthentication, User};

const ME_PATH: &str = "api/bds/v1/users/me";

/// The profile as last loaded: the user and their roles in this app.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSnapshot {
    pub me: Option<Arc<User>>,
    pub roles: Arc<Vec<String>>,
}

impl ProfileSnapshot {
    /// `SYSADMIN` holds every role.
    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == SYSADMIN_ROLE || r == role)
    }

    pub fn is_in_one_of_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        roles.iter().any(|r| self.is_in_role(r.as_ref()))
    }
}

/// Owns the `me` store. Every change is observable through [`watch`](Self::watch).
pub struct ProfileService {
    api: Arc<ApiClient>,
    config: Arc<ConfigService>,
    app_id: Option<String>,
    store: watch::Sender<ProfileSnapshot>,
}

impl ProfileService {
    pub fn new(api: Arc<ApiClient>, config: Arc<ConfigService>) -> Self {
        let (store, _) = watch::channel(ProfileSnapshot::default());
        Self {
            api,
            config,
            app_id: None,
            store,
        }
    }

    /// Resolve roles against `app_id` instead of the configured one.
    #[must_use]
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    // ── Store ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ProfileSnapshot {
        self.store.borrow().clone()
    }

    pub fn me(&self) -> Option<Arc<User>> {
        self.store.borrow().me.clone()
    }

    pub fn roles(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.store.borrow().roles)
    }

    /// Profile-changed notifications.
    pub fn watch(&self) -> watch::Receiver<ProfileSnapshot> {
        self.store.subscribe()
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.store.borrow().is_in_role(role)
    }

    pub fn is_in_one_of_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.store.borrow().is_in_one_of_roles(roles)
    }

    /// Forget the profile. Notifies only if one was loaded.
    pub fn clear_user_profile(&self) {
        self.store.send_if_modified(|snapshot| {
            if snapshot.me.is_none() {
                return false;
            }
            *snapshot = ProfileSnapshot::default();
            true
        });
    }

    fn replace(&self, user: User) -> Arc<User> {
        let app_id = self.app_id.clone().unwrap_or_else(|| self.config.app_id());
        let roles = user.roles_for_app(&app_id);
        debug!(roles = roles.len(), "profile updated");
        let user = Arc::new(user);
        self.store.send_replace(ProfileSnapshot {
            me: Some(Arc::clone(&user)),
            roles: Arc::new(roles),
        });
        user
    }

    // ── Remote operations ────────────────────────────────────────────

    /// Fetch `me` and store it.
    pub async fn load_user_profile(&self) -> Result<Option<Arc<User>>, CoreError> {
        Ok(self.get_user_info(&RequestOptions::default()).await?.map(|u| self.replace(u)))
    }

    pub async fn get_user_info(&self, opts: &RequestOptions) -> Result<Option<User>, CoreError> {
        Ok(self.api.get::<Option<User>>(ME_PATH, opts).await?.into_data())
    }

    pub async fn update_user_info(&self, user: &User) -> Result<Option<Arc<User>>, CoreError> {
        let resp = self
            .api
            .post::<Option<User>, _>(ME_PATH, user, &RequestOptions::default())
            .await?;
        Ok(resp.into_data().map(|u| self.replace(u)))
    }

    /// Apply an account change and store the returned profile.
    pub async fn change(&self, change: &ChangeMe) -> Result<Option<Arc<User>>, CoreError> {
        let path = format!("{ME_PATH}/{}", change.endpoint());
        let resp = self
            .api
            .post::<Option<User>, _>(&path, change, &RequestOptions::default())
            .await?;
        Ok(resp.into_data().map(|u| self.replace(u)))
    }

    pub async fn update_phone(
        &self,
        phone: Phone,
        challenge: Option<ChallengeRequest>,
    ) -> Result<Option<Arc<User>>, CoreError> {
        self.change(&ChangeMe::Phone { phone, challenge }).await
    }

    pub async fn update_login(
        &self,
        login: impl Into<String>,
        challenge: Option<ChallengeRequest>,
    ) -> Result<Option<Arc<User>>, CoreError> {
        self.change(&ChangeMe::Login {
            login: login.into(),
            challenge,
        })
        .await
    }

    pub async fn update_two_factor(
        &self,
        two_factor_authentication: TwoFactorAuthentication,
        challenge: Option<ChallengeRequest>,
    ) -> Result<Option<Arc<User>>, CoreError> {
        self.change(&ChangeMe::TwoFactor {
            two_factor_authentication,
            challenge,
        })
        .await
    }

    pub async fn update_password(
        &self,
        old_password: impl Into<String>,
        new_password: impl Into<String>,
        challenge: Option<ChallengeRequest>,
    ) -> Result<Option<Arc<User>>, CoreError> {
        self.change(&ChangeMe::Password {
            old_password: old_password.into(),
            new_password: new_password.into(),
            challenge,
        })
        .await
    }

    pub async fn update_email(
        &self,
        email: impl Into<String>,
        activation_url: Option<String>,
        challenge: Option<ChallengeRequest>,
    ) -> Result<Option<Arc<User>>, CoreError> {
        self.change(&ChangeMe::Email {
            email: email.into(),
            activation_url,
            mail_template_id: None,
            challenge,
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn snapshot(roles: &[&str]) -> ProfileSnapshot {
        ProfileSnapshot {
            me: Some(Arc::new(User::default())),
            roles: Arc::new(roles.iter().map(ToString::to_string).collect()),
        }
    }

    #[test]
    fn sysadmin_holds_every_role() {
        let admin = snapshot(&[SYSADMIN_ROLE]);
        assert!(admin.is_in_role("EDITOR"));
        assert!(admin.is_in_one_of_roles(&["ANYTHING"]));
    }

    #[test]
    fn roles_match_exactly() {
        let editor = snapshot(&["EDITOR"]);
        assert!(editor.is_in_role("EDITOR"));
        assert!(!editor.is_in_role("editor"));
        assert!(editor.is_in_one_of_roles(&["VIEWER", "EDITOR"]));
        assert!(!editor.is_in_one_of_roles::<&str>(&[]));
    }

    #[test]
    fn empty_profile_has_no_roles() {
        assert!(!ProfileSnapshot::default().is_in_role("EDITOR"));
    }
}
