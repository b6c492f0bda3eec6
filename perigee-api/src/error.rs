use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::CommentId;

#[derive(Clone, Debug, Eq, PartialEq, bolero::generator::TypeGenerator, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Comment not found {0:?}")]
    CommentNotFound(CommentId),

    #[error("Replying to comment {0:?} would nest deeper than allowed")]
    DepthExceeded(CommentId),

    #[error("Comment content is empty")]
    EmptyContent,

    #[error("Comment content is {len} bytes long, over the maximum of {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(#[generator(bolero::generator::gen_arbitrary())] Uuid),

    /// Client-side only: the request never reached the server, or the
    /// response never made it back. Eligible for retry.
    #[error("Network error: {0}")]
    Network(String),
}

impl Error {
    /// Whether retrying the exact same request can reasonably be expected to
    /// help. Optimistic mutations roll back either way.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::CommentNotFound(_) => StatusCode::NOT_FOUND,
            Error::DepthExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::EmptyContent => StatusCode::BAD_REQUEST,
            Error::ContentTooLong { .. } => StatusCode::BAD_REQUEST,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::Network(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::Unauthenticated => json!({
                "message": "authentication required",
                "type": "unauthenticated",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::CommentNotFound(c) => json!({
                "message": "comment not found",
                "type": "comment-not-found",
                "comment": c.0,
            }),
            Error::DepthExceeded(c) => json!({
                "message": "reply would nest deeper than allowed",
                "type": "depth-exceeded",
                "parent": c.0,
            }),
            Error::EmptyContent => json!({
                "message": "comment content is empty",
                "type": "empty-content",
            }),
            Error::ContentTooLong { len, max } => json!({
                "message": "comment content is too long",
                "type": "content-too-long",
                "len": len,
                "max": max,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::Network(msg) => json!({
                "message": msg,
                "type": "network",
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let get_str = |field: &'static str| {
            data.get(field)
                .and_then(|f| f.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error contents has no string field {field:?}"))
        };
        let get_uuid = |field: &'static str| {
            data.get(field)
                .and_then(|f| f.as_str())
                .and_then(|f| Uuid::from_str(f).ok())
                .ok_or_else(|| anyhow!("error contents has no uuid field {field:?}"))
        };
        let get_usize = |field: &'static str| {
            data.get(field)
                .and_then(|f| f.as_u64())
                .map(|f| f as usize)
                .ok_or_else(|| anyhow!("error contents has no integer field {field:?}"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(get_str("message")?),
                "unauthenticated" => Error::Unauthenticated,
                "permission-denied" => Error::PermissionDenied,
                "comment-not-found" => Error::CommentNotFound(CommentId(get_uuid("comment")?)),
                "depth-exceeded" => Error::DepthExceeded(CommentId(get_uuid("parent")?)),
                "empty-content" => Error::EmptyContent,
                "content-too-long" => Error::ContentTooLong {
                    len: get_usize("len")?,
                    max: get_usize("max")?,
                },
                "null-byte" => Error::NullByteInString(get_str("string")?),
                "invalid-name" => Error::InvalidName(get_str("name")?),
                "conflict-name" => Error::NameAlreadyUsed(get_str("name")?),
                "conflict-uuid" => Error::UuidAlreadyUsed(get_uuid("uuid")?),
                "network" => Error::Network(get_str("message")?),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
