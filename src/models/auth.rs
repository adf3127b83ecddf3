use serde::Serialize;
use serde_json::{Map, Value};

/// Fixed id used for every field of the admin identity.
pub const ADMIN_PRINCIPAL_ID: &str = "0";

/// An authenticated caller, produced by the token verifier and attached to
/// the request extensions by the auth middleware.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Identity {
    pub audience: String,
    pub brand_id: String,
    pub user_id: String,
    pub is_admin: bool,
    /// Full verified claim set, for handlers that need more than the ids.
    pub claims: Map<String, Value>,
}

impl Identity {
    /// The privileged identity granted to holders of the static admin token.
    pub fn admin() -> Self {
        let mut claims = Map::new();
        claims.insert("aud".to_string(), Value::from(0));
        claims.insert("brandId".to_string(), Value::from(0));
        claims.insert("userId".to_string(), Value::from(0));

        Self {
            audience: ADMIN_PRINCIPAL_ID.to_string(),
            brand_id: ADMIN_PRINCIPAL_ID.to_string(),
            user_id: ADMIN_PRINCIPAL_ID.to_string(),
            is_admin: true,
            claims,
        }
    }
}
