use uuid::Uuid;

use crate::STUB_UUID;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn stub() -> UserId {
        UserId(STUB_UUID)
    }
}

/// A user as embedded in node payloads. Only the id is guaranteed; the
/// username is filled in on a best-effort basis by the backend.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    pub fn named(id: UserId, username: &str) -> User {
        User {
            id,
            username: Some(username.to_string()),
        }
    }
}
