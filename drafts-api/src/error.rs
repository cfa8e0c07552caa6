use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// Transport-level failure on the client side. The backend never sends
    /// this one itself.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("No such node {0}")]
    NotFound(Uuid),

    #[error("Content is empty")]
    EmptyContent,

    #[error("Rejected image: {0}")]
    InvalidImage(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::EmptyContent => StatusCode::BAD_REQUEST,
            Error::InvalidImage(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::Network(msg) => json!({
                "message": msg,
                "type": "network",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotFound(id) => json!({
                "message": "no such node",
                "type": "not-found",
                "node": id,
            }),
            Error::EmptyContent => json!({
                "message": "content must not be empty",
                "type": "empty-content",
            }),
            Error::InvalidImage(msg) => json!({
                "message": msg,
                "type": "invalid-image",
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let message = || {
            String::from(
                data.get("message")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or(""),
            )
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(message()),
                "network" => Error::Network(message()),
                "permission-denied" => Error::PermissionDenied,
                "not-found" => Error::NotFound(
                    data.get("node")
                        .and_then(|id| id.as_str())
                        .and_then(|id| Uuid::from_str(id).ok())
                        .ok_or_else(|| anyhow!("error is a not-found without a proper node id"))?,
                ),
                "empty-content" => Error::EmptyContent,
                "invalid-image" => Error::InvalidImage(message()),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
