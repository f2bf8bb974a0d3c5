use anyhow::{anyhow, Context};
use serde_json::json;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AccessDenied(_) => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        let (kind, msg) = match self {
            Error::Unknown(m) => ("unknown", m),
            Error::NotFound(m) => ("not-found", m),
            Error::AccessDenied(m) => ("access-denied", m),
            Error::BadRequest(m) => ("bad-request", m),
        };
        serde_json::to_vec(&json!({
            "type": kind,
            "message": msg,
        }))
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let msg = String::from(
            data.get("message")
                .and_then(|m| m.as_str())
                .ok_or_else(|| anyhow!("error message is not a string"))?,
        );
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(msg),
                "not-found" => Error::NotFound(msg),
                "access-denied" => Error::AccessDenied(msg),
                "bad-request" => Error::BadRequest(msg),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn status_codes() {
        assert_eq!(
            Error::Unknown(String::new()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::NotFound(String::new()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::AccessDenied(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::BadRequest(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn contents_parse_back() {
        for err in [
            Error::Unknown(String::from("boom")),
            Error::NotFound(String::from("comment missing")),
            Error::AccessDenied(String::from("nope")),
            Error::BadRequest(String::from("bad")),
        ] {
            assert_eq!(Error::parse(&err.contents()).unwrap(), err);
        }
        assert!(Error::parse(br#"{"type":"???","message":"x"}"#).is_err());
        assert!(Error::parse(b"not even json").is_err());
    }
}
