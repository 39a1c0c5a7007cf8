use std::collections::BTreeMap;

use axum::{
	extract::{Path, Query, State},
	Json,
};
use futures::TryStreamExt;
use mongodb::{
	bson::{doc, to_bson, DateTime, Document},
	options::FindOptions,
};
use serde_json::{json, Value};

use crate::{
	cars::query::number_param,
	db_client::{rfc3339, DbClient, DAMAGE_REPORTS},
	error::{ApiError, ApiResult},
	inference::damage::{DamageCrop, Detection},
	users::AuthUser,
};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 100;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
	#[default]
	InProgress,
	Completed,
}

/// Analysis of one photo within a report.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct ImageResult {
	pub image_index: u32,
	#[serde(default)]
	pub annotated_image: Option<String>,
	#[serde(default)]
	pub detections: Vec<Detection>,
	#[serde(default)]
	pub damage_counts: BTreeMap<String, u32>,
	#[serde(default)]
	pub damage_crops: Vec<DamageCrop>,
	#[serde(default)]
	pub total_damages: u32,
}

/// A multi-photo damage inspection of one car, owned by the user who ran it.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct DamageReport {
	pub report_id: String,
	pub user_id: String,
	#[serde(default)]
	pub car_id: Option<String>,
	pub car_title: String,
	#[serde(default)]
	pub total_images: u32,
	#[serde(default)]
	pub image_results: Vec<ImageResult>,
	#[serde(default)]
	pub total_damages: u32,
	#[serde(default)]
	pub status: ReportStatus,
	pub created_at: DateTime,
	pub updated_at: DateTime,
}

impl DamageReport {
	/// Replaces the result with the same index, or appends a new one.
	pub fn upsert_image(&mut self, result: ImageResult) {
		match self.image_results.iter_mut().find(|r| r.image_index == result.image_index) {
			Some(existing) => *existing = result,
			None => self.image_results.push(result),
		}
	}

	pub fn to_json(&self, with_images: bool) -> Value {
		let mut value = ReportSummary::from(self).to_json();
		if with_images {
			value["image_results"] = json!(self.image_results);
		}
		value
	}
}

/// A report as listed: everything but the per-image payloads, which can hold
/// several base64 images each.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct ReportSummary {
	pub report_id: String,
	pub user_id: String,
	#[serde(default)]
	pub car_id: Option<String>,
	pub car_title: String,
	#[serde(default)]
	pub total_images: u32,
	#[serde(default)]
	pub total_damages: u32,
	#[serde(default)]
	pub status: ReportStatus,
	#[serde(default)]
	pub image_results_count: u64,
	pub created_at: DateTime,
	pub updated_at: DateTime,
}

impl ReportSummary {
	/// Projection that builds a summary server-side, counting image results
	/// without returning them.
	pub fn projection() -> Document {
		doc! {
			"_id": 0,
			"report_id": 1,
			"user_id": 1,
			"car_id": 1,
			"car_title": 1,
			"total_images": 1,
			"total_damages": 1,
			"status": 1,
			"created_at": 1,
			"updated_at": 1,
			"image_results_count": { "$size": { "$ifNull": ["$image_results", []] } },
		}
	}

	pub fn to_json(&self) -> Value {
		json!({
			"report_id": self.report_id,
			"user_id": self.user_id,
			"car_id": self.car_id,
			"car_title": self.car_title,
			"total_images": self.total_images,
			"total_damages": self.total_damages,
			"status": self.status,
			"image_results_count": self.image_results_count,
			"created_at": rfc3339(self.created_at),
			"updated_at": rfc3339(self.updated_at),
		})
	}
}

impl From<&DamageReport> for ReportSummary {
	fn from(report: &DamageReport) -> Self {
		ReportSummary {
			report_id: report.report_id.clone(),
			user_id: report.user_id.clone(),
			car_id: report.car_id.clone(),
			car_title: report.car_title.clone(),
			total_images: report.total_images,
			total_damages: report.total_damages,
			status: report.status,
			image_results_count: report.image_results.len() as u64,
			created_at: report.created_at,
			updated_at: report.updated_at,
		}
	}
}

#[derive(serde::Deserialize, Debug)]
pub struct NewReport {
	#[serde(default)]
	pub car_id: Option<String>,
	#[serde(default)]
	pub car_title: Option<String>,
	#[serde(default)]
	pub total_images: u32,
}

pub async fn create_report(db: State<DbClient>, caller: AuthUser, body: Json<NewReport>) -> ApiResult<Json<Value>> {
	let body = body.0;
	let now = DateTime::now();
	let report = DamageReport {
		report_id: uuid::Uuid::new_v4().to_string(),
		user_id: caller.id_hex(),
		car_id: body.car_id,
		car_title: body.car_title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| "Unknown Vehicle".to_owned()),
		total_images: body.total_images,
		image_results: Vec::new(),
		total_damages: 0,
		status: ReportStatus::InProgress,
		created_at: now,
		updated_at: now,
	};
	db.damage_reports().insert_one(&report, None).await?;
	log::info!("damage report {} created by {}", report.report_id, report.user_id);
	Ok(Json(json!({ "status": "success", "message": "Damage report created", "report_id": report.report_id })))
}

async fn owned_report(db: &DbClient, report_id: &str, caller: &AuthUser) -> ApiResult<DamageReport> {
	db.damage_reports()
		.find_one(doc! { "report_id": report_id, "user_id": caller.id_hex() }, None)
		.await?
		.ok_or_else(|| ApiError::not_found("Report not found"))
}

#[derive(serde::Deserialize, Debug)]
pub struct ImageAnalysis {
	#[serde(default)]
	pub annotated_image: Option<String>,
	#[serde(default)]
	pub detections: Vec<Detection>,
	#[serde(default)]
	pub damage_counts: BTreeMap<String, u32>,
	#[serde(default)]
	pub damage_crops: Vec<DamageCrop>,
	#[serde(default)]
	pub total_damages: Option<u32>,
}

impl ImageAnalysis {
	fn into_result(self, image_index: u32) -> ImageResult {
		ImageResult {
			image_index,
			total_damages: self.total_damages.unwrap_or(self.detections.len() as u32),
			annotated_image: self.annotated_image,
			detections: self.detections,
			damage_counts: self.damage_counts,
			damage_crops: self.damage_crops,
		}
	}
}

pub async fn update_report_image(
	db: State<DbClient>,
	caller: AuthUser,
	Path((report_id, image_index)): Path<(String, u32)>,
	body: Json<ImageAnalysis>,
) -> ApiResult<Json<Value>> {
	let mut report = owned_report(&db, &report_id, &caller).await?;
	report.upsert_image(body.0.into_result(image_index));

	db.damage_reports()
		.update_one(
			doc! { "report_id": &report_id, "user_id": &report.user_id },
			doc! { "$set": { "image_results": to_bson(&report.image_results)?, "updated_at": DateTime::now() } },
			None,
		)
		.await?;
	Ok(Json(json!({ "status": "success", "message": format!("Image {image_index} analysis added to report") })))
}

#[derive(serde::Deserialize, Debug, Default)]
pub struct Completion {
	#[serde(default)]
	pub total_damages: Option<u32>,
}

pub async fn complete_report(
	db: State<DbClient>,
	caller: AuthUser,
	Path(report_id): Path<String>,
	body: Option<Json<Completion>>,
) -> ApiResult<Json<Value>> {
	let report = owned_report(&db, &report_id, &caller).await?;
	let total_damages = body
		.and_then(|b| b.0.total_damages)
		.unwrap_or_else(|| report.image_results.iter().map(|r| r.total_damages).sum());

	db.damage_reports()
		.update_one(
			doc! { "report_id": &report_id, "user_id": &report.user_id },
			doc! { "$set": { "total_damages": total_damages, "status": "completed", "updated_at": DateTime::now() } },
			None,
		)
		.await?;
	log::info!("damage report {} completed with {} damages", report_id, total_damages);
	Ok(Json(json!({ "status": "success", "message": "Report completed successfully" })))
}

pub async fn delete_report(db: State<DbClient>, caller: AuthUser, Path(report_id): Path<String>) -> ApiResult<Json<Value>> {
	let result = db.damage_reports().delete_one(doc! { "report_id": &report_id, "user_id": caller.id_hex() }, None).await?;
	if result.deleted_count == 0 {
		return Err(ApiError::not_found("Report not found or you don't have permission to delete it"));
	}
	Ok(Json(json!({ "status": "success", "message": "Damage report deleted successfully" })))
}

#[derive(Debug, Default)]
pub struct ReportPage {
	pub limit: Option<i64>,
	pub skip: Option<i64>,
}

impl ReportPage {
	pub fn from_pairs(pairs: &[(String, String)]) -> ApiResult<Self> {
		Ok(ReportPage { limit: number_param(pairs, "limit")?, skip: number_param(pairs, "skip")? })
	}

	fn window(&self) -> ApiResult<(i64, u64)> {
		let limit = self.limit.unwrap_or(DEFAULT_PAGE);
		if !(1..=MAX_PAGE).contains(&limit) {
			return Err(ApiError::bad_request(format!("limit must be between 1 and {MAX_PAGE}")));
		}
		let skip = u64::try_from(self.skip.unwrap_or(0)).map_err(|_| ApiError::bad_request("skip must not be negative"))?;
		Ok((limit, skip))
	}
}

pub fn has_more(skip: u64, returned: usize, total: u64) -> bool {
	skip + (returned as u64) < total
}

pub async fn list_reports(db: State<DbClient>, caller: AuthUser, Query(pairs): Query<Vec<(String, String)>>) -> ApiResult<Json<Value>> {
	let (limit, skip) = ReportPage::from_pairs(&pairs)?.window()?;
	let filter = doc! { "user_id": caller.id_hex() };
	let total = db.damage_reports().count_documents(filter.clone(), None).await?;

	let options = FindOptions::builder()
		.sort(doc! { "created_at": -1 })
		.skip(skip)
		.limit(limit)
		.projection(ReportSummary::projection())
		.build();
	let reports: Vec<ReportSummary> = db.collection::<ReportSummary>(DAMAGE_REPORTS).find(filter, options).await?.try_collect().await?;
	let returned = reports.len();
	let reports: Vec<Value> = reports.iter().map(ReportSummary::to_json).collect();

	Ok(Json(json!({
		"status": "success",
		"reports": reports,
		"pagination": { "total": total, "limit": limit, "skip": skip, "has_more": has_more(skip, returned, total) },
	})))
}

pub async fn get_report(db: State<DbClient>, caller: AuthUser, Path(report_id): Path<String>) -> ApiResult<Json<Value>> {
	let report = owned_report(&db, &report_id, &caller).await?;
	log::debug!("fetched report {} with {} image results", report_id, report.image_results.len());
	Ok(Json(json!({ "status": "success", "report": report.to_json(true) })))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn report() -> DamageReport {
		DamageReport {
			report_id: "r1".to_owned(),
			user_id: "u1".to_owned(),
			car_id: None,
			car_title: "Unknown Vehicle".to_owned(),
			total_images: 2,
			image_results: Vec::new(),
			total_damages: 0,
			status: ReportStatus::InProgress,
			created_at: DateTime::from_millis(0),
			updated_at: DateTime::from_millis(0),
		}
	}

	fn result(index: u32, damages: u32) -> ImageResult {
		ImageResult {
			image_index: index,
			annotated_image: None,
			detections: Vec::new(),
			damage_counts: BTreeMap::new(),
			damage_crops: Vec::new(),
			total_damages: damages,
		}
	}

	#[test]
	fn image_results_are_replaced_by_index() {
		let mut report = report();
		report.upsert_image(result(0, 1));
		report.upsert_image(result(1, 2));
		report.upsert_image(result(0, 5));
		assert_eq!(report.image_results.len(), 2);
		assert_eq!(report.image_results[0].total_damages, 5);
		assert_eq!(report.image_results[1].image_index, 1);
	}

	#[test]
	fn summaries_leave_out_image_payloads() {
		let mut report = report();
		report.upsert_image(result(0, 1));
		let summary = report.to_json(false);
		assert!(summary.get("image_results").is_none());
		assert_eq!(summary["image_results_count"], 1);
		assert_eq!(summary["status"], "in_progress");
		assert!(report.to_json(true)["image_results"].is_array());
	}

	#[test]
	fn pagination_window() {
		assert_eq!(ReportPage::default().window().unwrap(), (50, 0));
		assert!(ReportPage { limit: Some(0), skip: None }.window().is_err());
		assert!(ReportPage { limit: None, skip: Some(-1) }.window().is_err());
		assert!(has_more(0, 10, 11));
		assert!(!has_more(10, 1, 11));
	}

	#[test]
	fn projected_summary_matches_full_report() {
		let mut report = report();
		report.upsert_image(result(0, 1));
		report.upsert_image(result(1, 0));

		// what the server returns for the summary projection
		let projected: ReportSummary = mongodb::bson::from_document(doc! {
			"report_id": "r1",
			"user_id": "u1",
			"car_id": null,
			"car_title": "Unknown Vehicle",
			"total_images": 2,
			"total_damages": 0,
			"status": "in_progress",
			"image_results_count": 2,
			"created_at": DateTime::from_millis(0),
			"updated_at": DateTime::from_millis(0),
		})
		.unwrap();
		assert_eq!(projected, ReportSummary::from(&report));
		assert_eq!(projected.to_json(), report.to_json(false));

		let projection = ReportSummary::projection();
		assert_eq!(projection.get_i32("_id").unwrap(), 0);
		assert!(!projection.contains_key("image_results"));
		assert!(projection.get_document("image_results_count").unwrap().contains_key("$size"));
	}

	#[test]
	fn page_parameters_from_query_pairs() {
		let pairs = vec![("limit".to_owned(), "10".to_owned()), ("skip".to_owned(), "20".to_owned())];
		assert_eq!(ReportPage::from_pairs(&pairs).unwrap().window().unwrap(), (10, 20));
		let err = ReportPage::from_pairs(&[("limit".to_owned(), "abc".to_owned())]).unwrap_err();
		assert!(matches!(err, ApiError::BadRequest(_)));
	}

	#[test]
	fn analysis_counts_detections_when_total_missing() {
		let analysis: ImageAnalysis = serde_json::from_value(json!({
			"detections": [{ "class_id": 0, "class_name": "dent", "confidence": 0.9, "bbox": [0.0, 0.0, 1.0, 1.0] }],
		}))
		.unwrap();
		assert_eq!(analysis.into_result(3).total_damages, 1);
	}
}
