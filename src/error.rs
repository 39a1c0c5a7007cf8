use axum::{
	http::{header, HeaderValue},
	response::{IntoResponse, Response},
	Json,
};
use hyper::StatusCode;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("{0}")]
	BadRequest(String),

	#[error("{0}")]
	Unauthorized(String),

	#[error("{0}")]
	Forbidden(String),

	#[error("{0}")]
	NotFound(String),

	#[error("database error: {0}")]
	Database(#[from] mongodb::error::Error),

	#[error("{0}")]
	Internal(String),
}

impl ApiError {
	pub fn bad_request(msg: impl Into<String>) -> Self {
		ApiError::BadRequest(msg.into())
	}

	pub fn not_found(msg: impl Into<String>) -> Self {
		ApiError::NotFound(msg.into())
	}

	pub fn unauthorized(msg: impl Into<String>) -> Self {
		ApiError::Unauthorized(msg.into())
	}

	pub fn internal(msg: impl Into<String>) -> Self {
		ApiError::Internal(msg.into())
	}

	pub fn status(&self) -> StatusCode {
		match self {
			ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
			ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
			ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
			ApiError::NotFound(_) => StatusCode::NOT_FOUND,
			ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl From<mongodb::bson::ser::Error> for ApiError {
	fn from(err: mongodb::bson::ser::Error) -> Self {
		ApiError::Internal(format!("serialization error: {err}"))
	}
}

impl From<std::io::Error> for ApiError {
	fn from(err: std::io::Error) -> Self {
		ApiError::Internal(format!("storage error: {err}"))
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			log::error!("request failed: {self}");
		}
		let detail = match &self {
			ApiError::Database(_) => "Internal server error".to_owned(),
			other => other.to_string(),
		};
		let mut response = (status, Json(json!({ "detail": detail }))).into_response();
		if status == StatusCode::UNAUTHORIZED {
			response.headers_mut().insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
		}
		response
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unauthorized_carries_bearer_challenge() {
		let response = ApiError::unauthorized("Could not validate credentials").into_response();
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
		assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
	}

	#[test]
	fn internal_errors_map_to_500() {
		assert_eq!(ApiError::internal("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(ApiError::not_found("missing").status(), StatusCode::NOT_FOUND);
	}
}
