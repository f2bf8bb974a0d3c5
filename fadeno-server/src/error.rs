use fadeno_api::Error as ApiError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn not_found(msg: impl Into<String>) -> Error {
        Error::Api(ApiError::NotFound(msg.into()))
    }

    pub fn access_denied(msg: impl Into<String>) -> Error {
        Error::Api(ApiError::AccessDenied(msg.into()))
    }

    pub fn bad_request(msg: impl Into<String>) -> Error {
        Error::Api(ApiError::BadRequest(msg.into()))
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
        (err.status_code(), err.contents()).into_response()
    }
}
