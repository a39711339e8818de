use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found {0}")]
    NotFound(Uuid),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Missing required field {0:?}")]
    MissingField(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Parent comment {0} is not on this lesson")]
    InvalidParent(Uuid),

    #[error("Already enrolled in course {0}")]
    AlreadyEnrolled(Uuid),

    #[error("Not enrolled in course {0}")]
    NotEnrolled(Uuid),

    #[error("New lesson order must list every lesson of course {0} once")]
    InvalidLessonOrder(Uuid),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::MissingField(_) => StatusCode::BAD_REQUEST,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::InvalidParent(_) => StatusCode::BAD_REQUEST,
            Error::AlreadyEnrolled(_) => StatusCode::BAD_REQUEST,
            Error::NotEnrolled(_) => StatusCode::BAD_REQUEST,
            Error::InvalidLessonOrder(_) => StatusCode::BAD_REQUEST,
            Error::InvalidBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::NotFound(u) => json!({
                "message": "not found",
                "type": "not-found",
                "uuid": u,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::MissingField(f) => json!({
                "message": "a required field was missing or empty",
                "type": "missing-field",
                "field": f,
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
            Error::InvalidParent(u) => json!({
                "message": "parent comment is not on the same lesson",
                "type": "invalid-parent",
                "uuid": u,
            }),
            Error::AlreadyEnrolled(u) => json!({
                "message": "already enrolled in this course",
                "type": "already-enrolled",
                "uuid": u,
            }),
            Error::NotEnrolled(u) => json!({
                "message": "not enrolled in this course",
                "type": "not-enrolled",
                "uuid": u,
            }),
            Error::InvalidLessonOrder(u) => json!({
                "message": "the new order must list every lesson of the course exactly once",
                "type": "invalid-lesson-order",
                "uuid": u,
            }),
            Error::InvalidBody(reason) => json!({
                "message": "request body could not be parsed",
                "type": "invalid-body",
                "reason": reason,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let uuid = || {
            data.get("uuid")
                .and_then(|uuid| uuid.as_str())
                .and_then(|uuid| Uuid::from_str(uuid).ok())
                .ok_or_else(|| anyhow!("error is missing a proper uuid"))
        };
        let string = |field: &str| {
            data.get(field)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error is missing its {field:?} string"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "permission-denied" => Error::PermissionDenied,
                "not-found" => Error::NotFound(uuid()?),
                "conflict-uuid" => Error::UuidAlreadyUsed(uuid()?),
                "conflict-name" => Error::NameAlreadyUsed(string("name")?),
                "missing-field" => Error::MissingField(string("field")?),
                "null-byte" => Error::NullByteInString(string("string")?),
                "invalid-name" => Error::InvalidName(string("name")?),
                "invalid-parent" => Error::InvalidParent(uuid()?),
                "already-enrolled" => Error::AlreadyEnrolled(uuid()?),
                "not-enrolled" => Error::NotEnrolled(uuid()?),
                "invalid-lesson-order" => Error::InvalidLessonOrder(uuid()?),
                "invalid-body" => Error::InvalidBody(string("reason")?),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_parse_back() {
        let id = Uuid::new_v4();
        for err in [
            Error::Unknown(String::from("boom")),
            Error::PermissionDenied,
            Error::NotFound(id),
            Error::UuidAlreadyUsed(id),
            Error::NameAlreadyUsed(String::from("jane")),
            Error::MissingField(String::from("message")),
            Error::NullByteInString(String::from("a\0")),
            Error::InvalidName(String::from("a b")),
            Error::InvalidParent(id),
            Error::AlreadyEnrolled(id),
            Error::NotEnrolled(id),
            Error::InvalidLessonOrder(id),
            Error::InvalidBody(String::from("expected value at line 1 column 1")),
        ] {
            assert_eq!(Error::parse(&err.contents()).unwrap(), err);
        }
    }

    #[test]
    fn not_found_and_denied_are_distinct() {
        let denied = Error::PermissionDenied;
        let missing = Error::NotFound(Uuid::new_v4());
        assert_eq!(denied.status_code(), http::StatusCode::FORBIDDEN);
        assert_eq!(missing.status_code(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Error::parse(br#"{"type": "nope"}"#).is_err());
        assert!(Error::parse(b"not json").is_err());
    }
}
