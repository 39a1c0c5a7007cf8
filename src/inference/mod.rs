pub mod car_check;
pub mod damage;
pub mod model_client;

use axum::extract::Multipart;
use image::DynamicImage;

use crate::{
	config::Config,
	error::{ApiError, ApiResult},
	file_server::{read_form, FormData},
};
use model_client::ModelClient;

/// A segmentation outline as `[x, y]` vertices in image pixels.
pub type Polygon = Vec<[f64; 2]>;

/// A single detection as returned by the detection services:
/// `bbox` is `[x1, y1, x2, y2]` in pixels of the submitted image. Segmentation
/// models also send the outline of the detected region.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct RawDetection {
	pub class_id: i64,
	pub confidence: f64,
	pub bbox: [f64; 4],
	#[serde(default)]
	pub mask: Option<Polygon>,
}

#[derive(serde::Deserialize, Debug, Default)]
pub struct DetectionResponse {
	#[serde(default)]
	pub detections: Vec<RawDetection>,
}

/// The inference services that answered their health probe at start-up.
#[derive(Clone, Debug, Default)]
pub struct Models {
	pub car_detector: Option<ModelClient>,
	pub car_classifier: Option<ModelClient>,
	pub damage: Option<ModelClient>,
}

impl Models {
	pub async fn load(config: &Config) -> ApiResult<Self> {
		let http = ModelClient::http_client()?;
		let models = Models {
			car_detector: ModelClient::load("Car detection", config.car_detection_url.as_deref(), &http).await,
			car_classifier: ModelClient::load("Car classifier", config.car_classifier_url.as_deref(), &http).await,
			damage: ModelClient::load("Damage detection", config.damage_model_url.as_deref(), &http).await,
		};
		let loaded = [&models.car_detector, &models.car_classifier, &models.damage].iter().filter(|m| m.is_some()).count();
		log::info!("{} of 3 inference models available", loaded);
		Ok(models)
	}
}

pub(crate) fn require<'a>(model: &'a Option<ModelClient>, label: &str) -> ApiResult<&'a ModelClient> {
	model.as_ref().ok_or_else(|| {
		log::error!("{} model is not loaded", label);
		ApiError::internal(format!("{label} model not loaded"))
	})
}

/// An uploaded image: the raw bytes as sent, the decoded pixels, and the
/// remaining form fields.
pub struct UploadedImage {
	pub bytes: Vec<u8>,
	pub image: DynamicImage,
	pub form: FormData,
}

pub async fn uploaded_image(multipart: Multipart) -> ApiResult<UploadedImage> {
	let form = read_form(multipart).await?;
	let bytes = form.file("file").ok_or_else(|| ApiError::bad_request("No image file uploaded"))?.to_vec();
	let image = image::load_from_memory(&bytes).map_err(|e| ApiError::bad_request(format!("Invalid image: {e}")))?;
	Ok(UploadedImage { bytes, image, form })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_model_is_a_server_error() {
		let models = Models::default();
		let err = require(&models.damage, "Damage detection").unwrap_err();
		assert_eq!(err.status(), hyper::StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(err.to_string(), "Damage detection model not loaded");
	}

	#[test]
	fn detection_response_tolerates_missing_list() {
		let parsed: DetectionResponse = serde_json::from_str("{}").unwrap();
		assert!(parsed.detections.is_empty());
		let parsed: DetectionResponse =
			serde_json::from_str(r#"{"detections":[{"class_id":2,"confidence":0.8,"bbox":[1,2,3,4]}]}"#).unwrap();
		assert_eq!(parsed.detections[0].bbox, [1.0, 2.0, 3.0, 4.0]);
	}
}
