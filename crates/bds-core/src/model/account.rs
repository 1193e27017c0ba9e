// ── Session tokens and account request shapes ──

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::user::{Phone, TwoFactorAuthentication};

/// Token pair issued by sign-in and refresh. Uses the backend's snake_case
/// OAuth field names.
#[derive(Debug, Clone, Deserialize)]
pub struct Token {
    #[serde(default, rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(default, rename = "appId")]
    pub app_id: Option<String>,
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub access_token: Option<SecretString>,
    #[serde(default, rename = "identityProvider")]
    pub identity_provider: Option<String>,
    #[serde(default)]
    pub device_token: Option<String>,
    /// Access-token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<f64>,
}

impl Token {
    /// `Authorization` header value: `{token_type} {access_token}`.
    pub fn authorization(&self) -> Option<String> {
        let access = self.access_token.as_ref()?;
        let kind = self.token_type.as_deref().unwrap_or("Bearer");
        Some(format!("{kind} {}", access.expose_secret()))
    }
}

/// Sign-in response body; the token is nested.
#[derive(Debug, Deserialize)]
pub(crate) struct SignInResponse {
    pub token: Option<Token>,
}

// ── Challenges ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeMethod {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

/// Challenge issued by `challengecode`, answered with a [`ChallengeRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Challenge {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<ChallengeMethod>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ChallengeRequest {
    /// Answer `challenge` with the code the user received.
    pub fn answer(challenge: &Challenge, code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            date: challenge.date,
            hash: challenge.hash.clone(),
        }
    }
}

// ── Sign-in and account recovery ─────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Filled from the configured `userTypeName` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub user_name: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

impl LoginRequest {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

/// Ask for a challenge code to be sent through `method`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChallengeRequest {
    #[serde(flatten)]
    pub login: LoginRequest,
    pub method: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshTokenRequest {
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTokenRequest {
    pub token: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginRequest>,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_template_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendActivationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail_template_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TokenBody<'a> {
    pub token: &'a str,
}

// ── Profile changes ──────────────────────────────────────────────────

/// A change to the signed-in user's account, each optionally confirmed
/// by a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ChangeMe {
    Login {
        login: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeRequest>,
    },
    Phone {
        phone: Phone,
        #[serde(skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeRequest>,
    },
    TwoFactor {
        two_factor_authentication: TwoFactorAuthentication,
        #[serde(skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeRequest>,
    },
    Email {
        email: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        activation_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        mail_template_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeRequest>,
    },
    Password {
        old_password: String,
        new_password: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        challenge: Option<ChallengeRequest>,
    },
}

impl ChangeMe {
    /// Endpoint under `api/bds/v1/users/me/`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Login { .. } => "changelogin",
            Self::Phone { .. } => "changephone",
            Self::TwoFactor { .. } => "changetwofactor",
            Self::Email { .. } => "changeemail",
            Self::Password { .. } => "changepassword",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_reads_oauth_fields() {
        let token: Token = serde_json::from_value(json!({
            "access_token": "a-1",
            "refresh_token": "r-1",
            "token_type": "Bearer",
            "expires_in": 60,
            "deviceId": "d"
        }))
        .unwrap();
        assert_eq!(token.authorization().as_deref(), Some("Bearer a-1"));
        assert_eq!(token.expires_in, Some(60.0));
        assert_eq!(token.device_id.as_deref(), Some("d"));
        assert!(!format!("{token:?}").contains("a-1"));
    }

    #[test]
    fn change_requests_use_camel_case() {
        let change = ChangeMe::Password {
            old_password: "old".into(),
            new_password: "new".into(),
            challenge: None,
        };
        assert_eq!(change.endpoint(), "changepassword");
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"oldPassword": "old", "newPassword": "new"})
        );
    }

    #[test]
    fn login_request_skips_unset_fields() {
        let req = LoginRequest::new("ada", "pw");
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"userName": "ada", "password": "pw"})
        );
    }
}
