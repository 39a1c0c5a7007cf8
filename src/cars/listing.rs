use std::collections::HashMap;

use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime, Document};

use crate::{
	db_client::rfc3339,
	error::{ApiError, ApiResult},
};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListingStatus {
	#[default]
	Active,
	Sold,
}

impl ListingStatus {
	pub fn parse(s: &str) -> Option<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"active" => Some(ListingStatus::Active),
			"sold" => Some(ListingStatus::Sold),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ListingStatus::Active => "Active",
			ListingStatus::Sold => "Sold",
		}
	}
}

/// A car-for-sale document in `car_listings`.
///
/// `owner_id` is kept as raw BSON: listings written by older clients store
/// the owner as a hex string, newer ones as an ObjectId.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Listing {
	#[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
	pub id: Option<ObjectId>,
	pub title: String,
	pub make: String,
	pub model: String,
	pub year: i32,
	#[serde(rename = "bodyType", default)]
	pub body_type: String,
	pub price: f64,
	#[serde(default)]
	pub kilometers: i64,
	#[serde(rename = "fuelType", default)]
	pub fuel_type: String,
	#[serde(rename = "transmissionType", default)]
	pub transmission_type: String,
	#[serde(default)]
	pub color: String,
	#[serde(default)]
	pub condition: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cc: Option<i32>,
	#[serde(default)]
	pub location: String,
	#[serde(default)]
	pub description: String,
	#[serde(rename = "chatOption", default)]
	pub chat_option: String,
	#[serde(default)]
	pub images: Vec<String>,
	pub owner_id: Bson,
	#[serde(default)]
	pub status: ListingStatus,
	#[serde(default)]
	pub views: i64,
	#[serde(default = "DateTime::now")]
	pub created_at: DateTime,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<DateTime>,
}

/// Normalises an owner reference to its string form.
pub fn owner_key(owner: &Bson) -> String {
	match owner {
		Bson::ObjectId(oid) => oid.to_hex(),
		Bson::String(s) => s.trim().to_owned(),
		other => other.to_string(),
	}
}

/// Matches listings owned by `user_id` whichever way the reference was stored.
pub fn owned_by(user_id: ObjectId) -> Document {
	doc! { "owner_id": { "$in": [ user_id, user_id.to_hex() ] } }
}

impl Listing {
	pub fn owner_key(&self) -> String {
		owner_key(&self.owner_id)
	}

	pub fn is_owned_by(&self, user_id: ObjectId) -> bool {
		self.owner_key() == user_id.to_hex()
	}
}

#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct ListingView {
	#[serde(rename = "_id")]
	pub id: String,
	pub title: String,
	pub make: String,
	pub model: String,
	pub year: i32,
	#[serde(rename = "bodyType")]
	pub body_type: String,
	pub price: f64,
	pub kilometers: i64,
	#[serde(rename = "fuelType")]
	pub fuel_type: String,
	#[serde(rename = "transmissionType")]
	pub transmission_type: String,
	pub color: String,
	pub condition: String,
	pub cc: Option<i32>,
	pub location: String,
	pub description: String,
	#[serde(rename = "chatOption")]
	pub chat_option: String,
	pub images: Vec<String>,
	pub owner_id: String,
	pub owner_name: String,
	pub status: ListingStatus,
	pub views: i64,
	pub created_at: String,
}

impl ListingView {
	pub fn new(listing: Listing, owner_name: String) -> Self {
		ListingView {
			id: listing.id.map(|id| id.to_hex()).unwrap_or_default(),
			owner_id: listing.owner_key(),
			owner_name,
			title: listing.title,
			make: listing.make,
			model: listing.model,
			year: listing.year,
			body_type: listing.body_type,
			price: listing.price,
			kilometers: listing.kilometers,
			fuel_type: listing.fuel_type,
			transmission_type: listing.transmission_type,
			color: listing.color,
			condition: listing.condition,
			cc: listing.cc,
			location: listing.location,
			description: listing.description,
			chat_option: listing.chat_option,
			images: listing.images,
			status: listing.status,
			views: listing.views,
			created_at: rfc3339(listing.created_at),
		}
	}
}

/// Text fields of a listing submission, collected from a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingForm {
	pub title: String,
	pub make: String,
	pub model: String,
	pub year: i32,
	pub body_type: String,
	pub price: f64,
	pub kilometers: i64,
	pub fuel_type: String,
	pub transmission_type: String,
	pub color: String,
	pub condition: String,
	pub cc: Option<i32>,
	pub location: String,
	pub description: String,
	pub chat_option: String,
}

fn field<'a>(fields: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
	names.iter().find_map(|name| fields.get(*name)).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn required<'a>(fields: &'a HashMap<String, String>, names: &[&str]) -> ApiResult<&'a str> {
	field(fields, names).ok_or_else(|| ApiError::bad_request(format!("Missing field: {}", names[0])))
}

fn number<T: std::str::FromStr>(value: &str, name: &str) -> ApiResult<T> {
	value.parse().map_err(|_| ApiError::bad_request(format!("Invalid value for {name}: {value}")))
}

impl ListingForm {
	pub fn from_fields(fields: &HashMap<String, String>) -> ApiResult<Self> {
		let text = |names: &[&str]| field(fields, names).unwrap_or_default().to_owned();
		let kilometers = match field(fields, &["kilometers", "mileage"]) {
			Some(v) => number(v, "kilometers")?,
			None => 0,
		};
		let cc = field(fields, &["cc"]).map(|v| number(v, "cc")).transpose()?;
		let price: f64 = number(required(fields, &["price"])?, "price")?;
		if price < 0.0 {
			return Err(ApiError::bad_request("Price must not be negative"));
		}

		Ok(ListingForm {
			title: required(fields, &["title"])?.to_owned(),
			make: required(fields, &["make"])?.to_owned(),
			model: required(fields, &["model"])?.to_owned(),
			year: number(required(fields, &["year"])?, "year")?,
			body_type: text(&["bodyType", "body_type"]),
			price,
			kilometers,
			fuel_type: text(&["fuelType", "fuel_type"]),
			transmission_type: text(&["transmissionType", "transmission_type"]),
			color: text(&["color"]),
			condition: text(&["condition"]),
			cc,
			location: text(&["location"]),
			description: text(&["description"]),
			chat_option: text(&["chatOption", "chat_option"]),
		})
	}

	pub fn into_listing(self, owner: ObjectId, images: Vec<String>) -> Listing {
		Listing {
			id: None,
			title: self.title,
			make: self.make,
			model: self.model,
			year: self.year,
			body_type: self.body_type,
			price: self.price,
			kilometers: self.kilometers,
			fuel_type: self.fuel_type,
			transmission_type: self.transmission_type,
			color: self.color,
			condition: self.condition,
			cc: self.cc,
			location: self.location,
			description: self.description,
			chat_option: self.chat_option,
			images,
			owner_id: Bson::ObjectId(owner),
			status: ListingStatus::Active,
			views: 0,
			created_at: DateTime::now(),
			updated_at: None,
		}
	}
}

/// Partial update of a listing; absent fields are left untouched.
#[derive(serde::Deserialize, Debug, Default)]
pub struct ListingUpdate {
	pub title: Option<String>,
	pub make: Option<String>,
	pub model: Option<String>,
	pub year: Option<i32>,
	#[serde(alias = "bodyType")]
	pub body_type: Option<String>,
	pub price: Option<f64>,
	#[serde(alias = "mileage")]
	pub kilometers: Option<i64>,
	#[serde(alias = "fuelType")]
	pub fuel_type: Option<String>,
	#[serde(alias = "transmissionType")]
	pub transmission_type: Option<String>,
	pub color: Option<String>,
	pub condition: Option<String>,
	pub cc: Option<i32>,
	pub location: Option<String>,
	pub description: Option<String>,
	#[serde(alias = "chatOption")]
	pub chat_option: Option<String>,
}

impl ListingUpdate {
	pub fn to_set(&self) -> ApiResult<Document> {
		let mut set = Document::new();
		let strings = [
			("title", &self.title),
			("make", &self.make),
			("model", &self.model),
			("bodyType", &self.body_type),
			("fuelType", &self.fuel_type),
			("transmissionType", &self.transmission_type),
			("color", &self.color),
			("condition", &self.condition),
			("location", &self.location),
			("description", &self.description),
			("chatOption", &self.chat_option),
		];
		for (key, value) in strings {
			if let Some(value) = value {
				set.insert(key, value.trim());
			}
		}
		if let Some(year) = self.year {
			set.insert("year", year);
		}
		if let Some(price) = self.price {
			if price < 0.0 {
				return Err(ApiError::bad_request("Price must not be negative"));
			}
			set.insert("price", price);
		}
		if let Some(kilometers) = self.kilometers {
			set.insert("kilometers", kilometers);
		}
		if let Some(cc) = self.cc {
			set.insert("cc", cc);
		}
		if set.is_empty() {
			return Err(ApiError::bad_request("No fields to update"));
		}
		set.insert("updated_at", DateTime::now());
		Ok(set)
	}
}
