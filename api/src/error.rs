use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::error;

use chaindex_store::StoreError;

/// Handler-level failure: either the id did not resolve or the store choked.
pub(crate) enum ApiError {
    NotFound,
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> ApiError {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Store(err) => {
                error!("query failed: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;
