use std::{collections::BTreeMap, io::Cursor, sync::Arc};

use axum::{
	extract::{Multipart, State},
	Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops, ImageFormat, Rgb, RgbImage};

use crate::{
	error::{ApiError, ApiResult},
	inference::{require, uploaded_image, DetectionResponse, Models, Polygon, RawDetection},
};

pub const CLASS_NAMES: [&str; 6] = ["dent", "scratch", "crack", "glass shatter", "lamp broken", "tire flat"];

const CLASS_COLORS: [Rgb<u8>; 6] = [
	Rgb([255, 0, 0]),   // dent
	Rgb([0, 255, 0]),   // scratch
	Rgb([0, 0, 255]),   // crack
	Rgb([255, 255, 0]), // glass shatter
	Rgb([255, 0, 255]), // lamp broken
	Rgb([0, 255, 255]), // tire flat
];

pub const DEFAULT_THRESHOLD: f64 = 0.3;
const BOX_THICKNESS: u32 = 3;
const MASK_ALPHA: f64 = 0.5;
const CROP_MASK_ALPHA: f64 = 0.4;

/// Preprocessing switches understood by the damage service.
const FORWARDED_FLAGS: [&str; 4] = ["reduce_reflection", "enhance_contrast", "remove_background", "focus_on_damage"];

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Detection {
	pub class_id: usize,
	pub class_name: String,
	pub confidence: f64,
	pub bbox: [f64; 4],
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mask: Option<Polygon>,
}

impl Detection {
	fn outline(&self) -> Option<&[[f64; 2]]> {
		self.mask.as_deref().filter(|points| points.len() >= 3)
	}
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct DamageCrop {
	pub class_id: usize,
	pub class_name: String,
	pub confidence: f64,
	pub bbox: [u32; 4],
	/// Base64 JPEG of the boxed region.
	pub crop: String,
}

#[derive(serde::Serialize, Debug)]
pub struct DamageAnalysis {
	pub status: &'static str,
	pub message: &'static str,
	pub original_image: String,
	pub annotated_image: String,
	pub detections: Vec<Detection>,
	pub damage_counts: BTreeMap<String, u32>,
	pub damage_crops: Vec<DamageCrop>,
	pub total_damages: usize,
}

/// Drops detections under `threshold` and any class the model should not
/// emit.
pub fn keep_detections(raw: Vec<RawDetection>, threshold: f64) -> Vec<Detection> {
	raw.into_iter()
		.filter(|d| d.confidence >= threshold)
		.filter_map(|d| {
			let class_id = usize::try_from(d.class_id).ok()?;
			let class_name = CLASS_NAMES.get(class_id)?;
			Some(Detection {
				class_id,
				class_name: (*class_name).to_owned(),
				confidence: d.confidence,
				bbox: d.bbox,
				mask: d.mask,
			})
		})
		.collect()
}

pub fn damage_counts(detections: &[Detection]) -> BTreeMap<String, u32> {
	let mut counts = BTreeMap::new();
	for d in detections {
		*counts.entry(d.class_name.clone()).or_insert(0) += 1;
	}
	counts
}

/// Clamps `[x1, y1, x2, y2]` to the image, returning `[x1, y1, x2, y2]` in
/// whole pixels, or `None` for an empty box.
pub fn pixel_box(bbox: [f64; 4], width: u32, height: u32) -> Option<[u32; 4]> {
	let clamp = |v: f64, max: u32| v.max(0.0).min(max as f64) as u32;
	let (x1, x2) = (clamp(bbox[0].min(bbox[2]), width), clamp(bbox[0].max(bbox[2]), width));
	let (y1, y2) = (clamp(bbox[1].min(bbox[3]), height), clamp(bbox[1].max(bbox[3]), height));
	(x2 > x1 && y2 > y1).then_some([x1, y1, x2, y2])
}

fn draw_box(img: &mut RgbImage, [x1, y1, x2, y2]: [u32; 4], color: Rgb<u8>) {
	for t in 0..BOX_THICKNESS {
		let (top, bottom) = (y1 + t, y2.saturating_sub(1 + t));
		let (left, right) = (x1 + t, x2.saturating_sub(1 + t));
		if top > bottom || left > right {
			break;
		}
		for x in left..=right {
			img.put_pixel(x, top, color);
			img.put_pixel(x, bottom, color);
		}
		for y in top..=bottom {
			img.put_pixel(left, y, color);
			img.put_pixel(right, y, color);
		}
	}
}

/// Even-odd rule.
fn inside(polygon: &[[f64; 2]], x: f64, y: f64) -> bool {
	let mut inside = false;
	let mut j = polygon.len() - 1;
	for i in 0..polygon.len() {
		let ([xi, yi], [xj, yj]) = (polygon[i], polygon[j]);
		if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
			inside = !inside;
		}
		j = i;
	}
	inside
}

/// Adds `alpha * color` to every pixel whose centre falls inside `polygon`,
/// saturating at 255. `origin` is where `img` sits in the polygon's
/// coordinates, so crops can reuse the full-image outline.
fn overlay_mask(img: &mut RgbImage, polygon: &[[f64; 2]], origin: (u32, u32), color: Rgb<u8>, alpha: f64) {
	if polygon.len() < 3 {
		return;
	}
	let (ox, oy) = (origin.0 as f64, origin.1 as f64);
	let (min_x, max_x) = polygon.iter().fold((f64::MAX, f64::MIN), |(lo, hi), p| (lo.min(p[0] - ox), hi.max(p[0] - ox)));
	let (min_y, max_y) = polygon.iter().fold((f64::MAX, f64::MIN), |(lo, hi), p| (lo.min(p[1] - oy), hi.max(p[1] - oy)));
	let span = |lo: f64, hi: f64, len: u32| (lo.floor().max(0.0) as u32, (hi.ceil().max(0.0) as u32).min(len));
	let (x0, x1) = span(min_x, max_x, img.width());
	let (y0, y1) = span(min_y, max_y, img.height());

	for y in y0..y1 {
		for x in x0..x1 {
			if !inside(polygon, x as f64 + ox + 0.5, y as f64 + oy + 0.5) {
				continue;
			}
			let pixel = img.get_pixel_mut(x, y);
			for (channel, tint) in pixel.0.iter_mut().zip(color.0) {
				*channel = (*channel as f64 + alpha * tint as f64).round().min(255.0) as u8;
			}
		}
	}
}

/// Tints each detection's mask, or outlines its box when the model sent no
/// mask.
pub fn annotate(img: &RgbImage, detections: &[Detection]) -> RgbImage {
	let mut annotated = img.clone();
	for d in detections {
		let color = CLASS_COLORS[d.class_id];
		match d.outline() {
			Some(polygon) => overlay_mask(&mut annotated, polygon, (0, 0), color, MASK_ALPHA),
			None => {
				if let Some(bbox) = pixel_box(d.bbox, img.width(), img.height()) {
					draw_box(&mut annotated, bbox, color);
				}
			}
		}
	}
	annotated
}

/// The boxed region of `img`, with the detection's mask tinted in when present.
pub fn damage_crop(img: &RgbImage, d: &Detection, [x1, y1, x2, y2]: [u32; 4]) -> RgbImage {
	let mut crop = imageops::crop_imm(img, x1, y1, x2 - x1, y2 - y1).to_image();
	if let Some(polygon) = d.outline() {
		overlay_mask(&mut crop, polygon, (x1, y1), CLASS_COLORS[d.class_id], CROP_MASK_ALPHA);
	}
	crop
}

fn encode_jpeg(img: &RgbImage) -> ApiResult<String> {
	let mut out = Cursor::new(Vec::new());
	img.write_to(&mut out, ImageFormat::Jpeg).map_err(|e| ApiError::internal(format!("failed to encode image: {e}")))?;
	Ok(STANDARD.encode(out.into_inner()))
}

pub fn analyse(img: &RgbImage, raw: Vec<RawDetection>, threshold: f64) -> ApiResult<DamageAnalysis> {
	let detections = keep_detections(raw, threshold);

	let mut damage_crops = Vec::with_capacity(detections.len());
	for d in &detections {
		let Some(bbox) = pixel_box(d.bbox, img.width(), img.height()) else {
			log::debug!("skipping empty {} box {:?}", d.class_name, d.bbox);
			continue;
		};
		let crop = damage_crop(img, d, bbox);
		damage_crops.push(DamageCrop {
			class_id: d.class_id,
			class_name: d.class_name.clone(),
			confidence: d.confidence,
			bbox,
			crop: encode_jpeg(&crop)?,
		});
	}

	Ok(DamageAnalysis {
		status: "success",
		message: "Car damage detected",
		original_image: encode_jpeg(img)?,
		annotated_image: encode_jpeg(&annotate(img, &detections))?,
		damage_counts: damage_counts(&detections),
		total_damages: detections.len(),
		detections,
		damage_crops,
	})
}

fn threshold(value: Option<&String>) -> ApiResult<f64> {
	let Some(value) = value.map(|v| v.trim()).filter(|v| !v.is_empty()) else {
		return Ok(DEFAULT_THRESHOLD);
	};
	match value.parse::<f64>() {
		Ok(t) if (0.0..=1.0).contains(&t) => Ok(t),
		_ => Err(ApiError::bad_request("confidence_threshold must be a number between 0 and 1")),
	}
}

pub async fn detect_damage(models: State<Arc<Models>>, multipart: Multipart) -> ApiResult<Json<DamageAnalysis>> {
	let model = require(&models.damage, "Damage detection")?;
	let upload = uploaded_image(multipart).await?;
	let threshold = threshold(upload.form.fields.get("confidence_threshold"))?;

	let mut params: Vec<(&str, String)> = vec![("confidence_threshold", threshold.to_string())];
	for flag in FORWARDED_FLAGS {
		params.push((flag, upload.form.flag(flag).to_string()));
	}
	if let Some(model_type) = upload.form.fields.get("model_type").filter(|m| !m.trim().is_empty()) {
		params.push(("model_type", model_type.trim().to_owned()));
	}

	let response: DetectionResponse = model.predict(upload.bytes, &params).await?;
	let analysis = analyse(&upload.image.to_rgb8(), response.detections, threshold)?;
	log::info!("damage detection found {} damages: {:?}", analysis.total_damages, analysis.damage_counts);
	Ok(Json(analysis))
}
