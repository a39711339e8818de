use axum::extract::rejection::JsonRejection;
use lectern_api::{Error as ApiError, Uuid};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }

    pub fn not_found(uuid: Uuid) -> Error {
        Error::Api(ApiError::NotFound(uuid))
    }

}

impl From<JsonRejection> for Error {
    fn from(rej: JsonRejection) -> Error {
        let text = rej.body_text();
        let missing = text
            .split_once("missing field `")
            .and_then(|(_, rest)| rest.split_once('`'))
            .map(|(field, _)| String::from(field));
        Error::Api(match missing {
            Some(field) => ApiError::MissingField(field),
            None => ApiError::InvalidBody(text),
        })
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (
            err.status_code(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            err.contents(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, extract::FromRequest, http};
    use lectern_api::NewComment;

    use super::*;
    use crate::extractors::ApiJson;

    async fn parse(body: &str) -> Result<NewComment, Error> {
        let req = http::Request::builder()
            .method(http::Method::POST)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(String::from(body)))
            .unwrap();
        ApiJson::<NewComment>::from_request(req, &())
            .await
            .map(|ApiJson(c)| c)
    }

    #[tokio::test]
    async fn missing_fields_are_reported_by_name() {
        let id = Uuid::new_v4();
        let res = parse(&format!(r#"{{"id":"{id}","parent_id":null}}"#)).await;
        assert!(
            matches!(&res, Err(Error::Api(ApiError::MissingField(f))) if f == "message"),
            "got {res:?}"
        );
        let resp = axum::response::IntoResponse::into_response(res.unwrap_err());
        assert_eq!(resp.status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers()[http::header::CONTENT_TYPE],
            "application/json"
        );

        let comment = parse(&format!(r#"{{"id":"{id}","message":"hi"}}"#))
            .await
            .unwrap();
        assert_eq!(comment.message, "hi");
    }

    #[tokio::test]
    async fn malformed_bodies_are_invalid() {
        let res = parse(r#"{"id":42,"message":"hi"}"#).await;
        assert!(
            matches!(&res, Err(Error::Api(ApiError::InvalidBody(_)))),
            "got {res:?}"
        );
        let res = parse("not json").await;
        assert!(
            matches!(&res, Err(Error::Api(ApiError::InvalidBody(_)))),
            "got {res:?}"
        );
    }
}
