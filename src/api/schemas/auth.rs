use crate::domain::auth::AuthSession as DomainSession;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: u64,
}

impl From<DomainSession> for AuthSession {
    fn from(session: DomainSession) -> Self {
        Self { token: session.token, user_id: session.user_id, expires_at: session.expires_at }
    }
}
