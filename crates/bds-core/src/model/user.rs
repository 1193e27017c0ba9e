// ── Users, addresses and countries ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{Asset, BdsEntity, Reference, impl_entity};

/// Role granting access to everything, whatever the requested role.
pub const SYSADMIN_ROLE: &str = "SYSADMIN";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Phone {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_phone_ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoFactorAuthentication {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attention: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_location: Option<GeoLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<Reference>,
}

/// A role the user holds within one client application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientApplicationUserRole {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Platform user profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salutation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_password_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_factor_authentication: Option<TwoFactorAuthentication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culture: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Phone>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub client_application_user_roles: Vec<ClientApplicationUserRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_avatar: Option<Asset>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Roles held in the application identified by `app_id`.
    pub fn roles_for_app(&self, app_id: &str) -> Vec<String> {
        self.client_application_user_roles
            .iter()
            .filter(|r| {
                r.application
                    .as_ref()
                    .and_then(|a| a.id.as_deref())
                    .is_some_and(|id| id == app_id)
            })
            .filter_map(|r| r.role.clone())
            .collect()
    }
}

/// Country as listed by `api/bds/v1/app/countries`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Country {
    #[serde(flatten)]
    pub entity: BdsEntity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_code3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_extension: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_extension_name: Option<String>,
}

impl_entity!(User, Country);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn roles_are_filtered_by_application() {
        let user: User = serde_json::from_value(json!({
            "id": "u1",
            "login": "ada",
            "clientApplicationUserRoles": [
                {"application": {"id": "app-1"}, "role": "EDITOR"},
                {"application": {"id": "app-2"}, "role": "ADMIN"},
                {"application": {"id": "app-1"}, "role": "READER"},
                {"role": "ORPHAN"}
            ]
        }))
        .unwrap();
        assert_eq!(user.roles_for_app("app-1"), vec!["EDITOR", "READER"]);
        assert!(user.roles_for_app("app-3").is_empty());
    }

    #[test]
    fn unknown_user_fields_survive_a_round_trip() {
        let raw = json!({"id": "u1", "login": "ada", "nickname": "countess"});
        let user: User = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(user.extra.get("nickname"), Some(&json!("countess")));
        assert_eq!(serde_json::to_value(&user).unwrap(), raw);
    }
}
