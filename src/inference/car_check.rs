use std::sync::Arc;

use axum::{
	extract::{Multipart, State},
	Json,
};

use crate::{
	error::ApiResult,
	inference::{require, uploaded_image, DetectionResponse, Models, RawDetection},
};

/// COCO class id for "car".
pub const CAR_CLASS: i64 = 2;
pub const CAR_CONFIDENCE: f64 = 0.5;

#[derive(serde::Serialize, Debug, PartialEq, Eq)]
pub struct CarCheck {
	pub car_detected: bool,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Classification {
	pub prediction: String,
	pub probability: f64,
}

pub fn car_detected(detections: &[RawDetection]) -> bool {
	detections.iter().any(|d| d.class_id == CAR_CLASS && d.confidence > CAR_CONFIDENCE)
}

pub async fn check_car(models: State<Arc<Models>>, multipart: Multipart) -> ApiResult<Json<CarCheck>> {
	let model = require(&models.car_detector, "Car detection")?;
	let upload = uploaded_image(multipart).await?;
	let response: DetectionResponse = model.predict(upload.bytes, &[]).await?;
	let car_detected = car_detected(&response.detections);
	log::debug!("{} detections, car present: {}", response.detections.len(), car_detected);
	Ok(Json(CarCheck { car_detected }))
}

pub async fn classify(models: State<Arc<Models>>, multipart: Multipart) -> ApiResult<Json<Classification>> {
	let model = require(&models.car_classifier, "Car classifier")?;
	let upload = uploaded_image(multipart).await?;
	let classification: Classification = model.predict(upload.bytes, &[]).await?;
	log::info!("prediction: {}, probability: {:.3}", classification.prediction, classification.probability);
	Ok(Json(classification))
}
