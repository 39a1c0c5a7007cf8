use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ApiResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP handle on one external inference service.
///
/// The service takes raw image bytes on `POST /predict` and answers
/// `GET /health` with a 2xx once its weights are loaded.
#[derive(Clone, Debug)]
pub struct ModelClient {
	name: &'static str,
	base_url: String,
	http: reqwest::Client,
}

impl ModelClient {
	pub fn new(name: &'static str, base_url: &str, http: reqwest::Client) -> Self {
		ModelClient { name, base_url: base_url.trim_end_matches('/').to_owned(), http }
	}

	pub fn http_client() -> ApiResult<reqwest::Client> {
		reqwest::Client::builder()
			.user_agent(concat!("souq_server/", env!("CARGO_PKG_VERSION")))
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(|e| ApiError::internal(format!("failed to build inference client: {e}")))
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Probes the service once. A model that is not healthy here stays
	/// disabled for the lifetime of the process.
	pub async fn load(name: &'static str, base_url: Option<&str>, http: &reqwest::Client) -> Option<Self> {
		let Some(base_url) = base_url.filter(|url| !url.trim().is_empty()) else {
			log::warn!("{} model not configured", name);
			return None;
		};
		let client = ModelClient::new(name, base_url, http.clone());
		match client.http.get(format!("{}/health", client.base_url)).timeout(PROBE_TIMEOUT).send().await {
			Ok(response) if response.status().is_success() => {
				log::info!("{} model loaded from {}", name, client.base_url);
				Some(client)
			}
			Ok(response) => {
				log::error!("{} model at {} is unhealthy: {}", name, client.base_url, response.status());
				None
			}
			Err(e) => {
				log::error!("failed to load {} model from {}: {}", name, client.base_url, e);
				None
			}
		}
	}

	/// Sends `image` to the service and decodes its JSON answer.
	pub async fn predict<T: DeserializeOwned>(&self, image: Vec<u8>, params: &[(&str, String)]) -> ApiResult<T> {
		let response = self
			.http
			.post(format!("{}/predict", self.base_url))
			.query(params)
			.header(CONTENT_TYPE, "application/octet-stream")
			.body(image)
			.send()
			.await
			.map_err(|e| ApiError::internal(format!("{} inference failed: {e}", self.name)))?;

		let status = response.status();
		if status.is_client_error() {
			let detail = response.text().await.unwrap_or_default();
			log::warn!("{} rejected image: {} {}", self.name, status, detail);
			return Err(ApiError::bad_request(format!("{} could not process the image", self.name)));
		}
		if !status.is_success() {
			return Err(ApiError::internal(format!("{} inference failed with status {}", self.name, status)));
		}
		response.json().await.map_err(|e| ApiError::internal(format!("{} returned an unexpected response: {e}", self.name)))
	}
}
