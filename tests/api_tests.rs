use axum::{
	body::Body,
	http::{header, Request, StatusCode},
	Router,
};
use chrono::Duration;
use clap::Parser;
use http_body_util::BodyExt;
use serde_json::Value;
use souq_server::{
	config::Config,
	db_client::db_client,
	inference::Models,
	server::{app, AppState},
	tokens::TokenKeys,
};
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

/// The driver connects lazily, so none of these requests need a server as
/// long as they fail before the first query.
async fn test_app(upload_dir: &std::path::Path) -> Router {
	let config = Config::try_parse_from([
		"souq_server",
		"--mongodb-uri",
		"mongodb://127.0.0.1:27017",
		"--database",
		"souq_api_tests",
		"--jwt-secret",
		SECRET,
		"--upload-dir",
		upload_dir.to_str().unwrap(),
	])
	.unwrap();
	let db = db_client(&config.mongodb_uri, &config.database).await.unwrap();
	app(AppState::new(db, config, Models::default()))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
	let response = app.oneshot(request).await.unwrap();
	let status = response.status();
	let headers = response.headers().clone();
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
	(status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
	Request::get(uri).body(Body::empty()).unwrap()
}

fn multipart_image(uri: &str, token: Option<&str>) -> Request<Body> {
	let boundary = "souqboundary";
	let body = format!(
		"--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"car.jpg\"\r\nContent-Type: image/jpeg\r\n\r\nnot really a jpeg\r\n--{boundary}--\r\n"
	);
	let mut builder = Request::post(uri).header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"));
	if let Some(token) = token {
		builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
	}
	builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn root_reports_running() {
	let dir = tempfile::tempdir().unwrap();
	let (status, _, body) = send(test_app(dir.path()).await, get("/")).await;
	assert_eq!(status, StatusCode::OK);
	assert!(body["message"].as_str().unwrap().contains("running"));
}

#[tokio::test]
async fn protected_routes_require_a_token() {
	let dir = tempfile::tempdir().unwrap();
	for uri in ["/cars/my-listings", "/profile/profile", "/messages/conversations", "/damage/reports", "/admin/users"] {
		let (status, headers, body) = send(test_app(dir.path()).await, get(uri)).await;
		assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
		assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
		assert_eq!(body["detail"], "Authorization header missing");
	}
}

#[tokio::test]
async fn forged_and_expired_tokens_are_rejected() {
	let dir = tempfile::tempdir().unwrap();
	let forged = TokenKeys::new("some-other-secret").issue("64b7f0c2a1b2c3d4e5f60718").unwrap();
	let request = Request::get("/profile/profile").header(header::AUTHORIZATION, format!("Bearer {forged}")).body(Body::empty()).unwrap();
	let (status, _, body) = send(test_app(dir.path()).await, request).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body["detail"], "Invalid token");

	let expired = TokenKeys::new(SECRET).issue_with_lifetime("64b7f0c2a1b2c3d4e5f60718", Duration::hours(-1)).unwrap();
	let request = Request::get("/profile/profile").header(header::AUTHORIZATION, format!("Bearer {expired}")).body(Body::empty()).unwrap();
	let (status, _, body) = send(test_app(dir.path()).await, request).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body["detail"], "Token expired");
}

#[tokio::test]
async fn token_with_malformed_subject_is_rejected() {
	let dir = tempfile::tempdir().unwrap();
	let token = TokenKeys::new(SECRET).issue("not-an-object-id").unwrap();
	let request = Request::get("/messages/unread/count").header(header::AUTHORIZATION, format!("Bearer {token}")).body(Body::empty()).unwrap();
	let (status, _, body) = send(test_app(dir.path()).await, request).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(body["detail"], "Invalid token format");
}

#[tokio::test]
async fn malformed_listing_parameters_are_bad_requests() {
	let dir = tempfile::tempdir().unwrap();
	for uri in ["/cars/listings?minPrice=cheap", "/cars/listings?page=two", "/cars/listings?sortBy=colour", "/cars/listings?limit=1.5"] {
		let (status, _, body) = send(test_app(dir.path()).await, get(uri)).await;
		assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
		assert!(body["detail"].is_string());
	}
}

#[tokio::test]
async fn invalid_listing_id_is_a_bad_request() {
	let dir = tempfile::tempdir().unwrap();
	let (status, _, body) = send(test_app(dir.path()).await, get("/cars/listing/not-an-id")).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["detail"], "Invalid listing ID");
}

#[tokio::test]
async fn signup_is_validated_before_storage() {
	let dir = tempfile::tempdir().unwrap();
	let request = Request::post("/signup")
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(r#"{"username":"seller","email":"nope","password":"longenough","phone":"01012345678"}"#))
		.unwrap();
	let (status, _, body) = send(test_app(dir.path()).await, request).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(body["detail"], "Invalid email format");
}

#[tokio::test]
async fn unloaded_models_answer_500() {
	let dir = tempfile::tempdir().unwrap();
	let cases = [
		("/yolo/check_car", "Car detection model not loaded"),
		("/predict/predict", "Car classifier model not loaded"),
		("/damage/detect", "Damage detection model not loaded"),
	];
	for (uri, detail) in cases {
		let (status, _, body) = send(test_app(dir.path()).await, multipart_image(uri, None)).await;
		assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
		assert_eq!(body["detail"], detail);
	}
}

#[tokio::test]
async fn images_are_served_from_the_upload_dir() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("abc.png"), b"pixels").unwrap();

	let response = test_app(dir.path()).await.oneshot(get("/images/abc.png")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
	assert_eq!(&response.into_body().collect().await.unwrap().to_bytes()[..], b"pixels");

	let (status, _, _) = send(test_app(dir.path()).await, get("/images/missing.png")).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	let (status, _, _) = send(test_app(dir.path()).await, get("/images/.env")).await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cors_is_permissive_by_default() {
	let dir = tempfile::tempdir().unwrap();
	let request = Request::get("/").header(header::ORIGIN, "http://localhost:3000").body(Body::empty()).unwrap();
	let (_, headers, _) = send(test_app(dir.path()).await, request).await;
	assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
