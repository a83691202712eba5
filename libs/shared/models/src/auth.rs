use serde::{Deserialize, Serialize};

pub const ANONYMOUS: &str = "anonymous";
pub const DEFAULT_ROLE: &str = "athlete";

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

impl JwtClaims {
    /// Application role as stored by the signup flow. The top-level `role`
    /// claim is the database role (`authenticated`) and is ignored.
    pub fn app_role(&self) -> String {
        [&self.user_metadata, &self.app_metadata]
            .into_iter()
            .flatten()
            .find_map(|meta| meta.get("role").and_then(|r| r.as_str()))
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_ROLE)
            .to_string()
    }
}

/// Caller identity as seen by the governance layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Option<String>,
    pub role: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            role: ANONYMOUS.to_string(),
        }
    }

    pub fn user(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: role.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    pub fn key(&self) -> &str {
        self.user_id.as_deref().unwrap_or(ANONYMOUS)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(user_metadata: Option<serde_json::Value>, app_metadata: Option<serde_json::Value>) -> JwtClaims {
        JwtClaims {
            sub: "user-1".to_string(),
            exp: None,
            email: None,
            role: Some("authenticated".to_string()),
            app_metadata,
            user_metadata,
            aud: None,
            iat: None,
        }
    }

    #[test]
    fn role_comes_from_user_metadata_first() {
        let c = claims(Some(json!({"role": "brand"})), Some(json!({"role": "admin"})));
        assert_eq!(c.app_role(), "brand");
    }

    #[test]
    fn role_defaults_to_athlete() {
        assert_eq!(claims(None, None).app_role(), "athlete");
        assert_eq!(claims(Some(json!({"role": ""})), None).app_role(), "athlete");
    }

    #[test]
    fn anonymous_identity_key() {
        let identity = Identity::anonymous();
        assert!(identity.is_anonymous());
        assert_eq!(identity.key(), "anonymous");
        assert_eq!(Identity::user("u1", "brand").key(), "u1");
    }
}
