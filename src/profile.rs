use axum::{extract::State, Json};
use mongodb::{
	bson::{doc, DateTime, Document},
	options::UpdateOptions,
};
use serde_json::{json, Value};

use crate::{
	cars::{handlers::listings_owned_by, listing::ListingStatus, listing::ListingView},
	db_client::{rfc3339, DbClient},
	error::{ApiError, ApiResult},
	favorites::favorites_of,
	users::{email_pattern, phone_pattern, AuthUser, UserView},
};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct UserPreferences {
	pub user_id: String,
	pub email_notifications: bool,
	pub sms_notifications: bool,
	pub show_phone_number: bool,
	pub preferred_contact_method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<DateTime>,
}

impl UserPreferences {
	pub fn defaults_for(user_id: String) -> Self {
		UserPreferences {
			user_id,
			email_notifications: true,
			sms_notifications: false,
			show_phone_number: true,
			preferred_contact_method: "email".to_owned(),
			updated_at: None,
		}
	}
}

#[derive(serde::Deserialize, Debug, Default)]
pub struct PreferencesUpdate {
	pub email_notifications: Option<bool>,
	pub sms_notifications: Option<bool>,
	pub show_phone_number: Option<bool>,
	pub preferred_contact_method: Option<String>,
}

impl PreferencesUpdate {
	fn to_set(&self) -> ApiResult<Document> {
		let mut set = doc! { "updated_at": DateTime::now() };
		let flags = [
			("email_notifications", self.email_notifications),
			("sms_notifications", self.sms_notifications),
			("show_phone_number", self.show_phone_number),
		];
		for (key, value) in flags {
			if let Some(value) = value {
				set.insert(key, value);
			}
		}
		if let Some(method) = &self.preferred_contact_method {
			let method = method.trim().to_ascii_lowercase();
			if !matches!(method.as_str(), "email" | "phone" | "sms" | "chat") {
				return Err(ApiError::bad_request("preferred_contact_method must be one of email, phone, sms, chat"));
			}
			set.insert("preferred_contact_method", method);
		}
		Ok(set)
	}
}

#[derive(serde::Serialize, Debug, Default, PartialEq, Eq)]
pub struct ProfileStatistics {
	pub total_listings: usize,
	pub active_listings: usize,
	pub sold_cars: usize,
	pub favorite_cars_count: usize,
	pub total_views: i64,
}

impl ProfileStatistics {
	pub fn collect(listings: &[ListingView], favorite_cars_count: usize) -> Self {
		let with_status = |status| listings.iter().filter(|l| l.status == status).count();
		ProfileStatistics {
			total_listings: listings.len(),
			active_listings: with_status(ListingStatus::Active),
			sold_cars: with_status(ListingStatus::Sold),
			favorite_cars_count,
			total_views: listings.iter().map(|l| l.views).sum(),
		}
	}
}

pub async fn get_profile(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let listings = listings_owned_by(&db, &caller).await?;
	let favorites = db.favorites().count_documents(doc! { "user_id": caller.id_hex() }, None).await?;
	let statistics = ProfileStatistics::collect(&listings, favorites as usize);
	log::debug!("profile statistics for {}: {:?}", caller.id, statistics);

	Ok(Json(json!({
		"status": "success",
		"profile": {
			"user_id": caller.id_hex(),
			"name": caller.user.username,
			"email": caller.user.email,
			"phone": caller.user.phone,
			"role": caller.user.role,
			"created_date": caller.user.created_at.map(rfc3339),
		},
		"statistics": statistics,
	})))
}

#[derive(serde::Deserialize, Debug)]
pub struct ProfileUpdate {
	pub name: String,
	pub email: String,
	#[serde(default)]
	pub phone: Option<String>,
}

pub async fn update_profile(db: State<DbClient>, caller: AuthUser, body: Json<ProfileUpdate>) -> ApiResult<Json<Value>> {
	let body = body.0;
	let name = body.name.trim();
	if name.is_empty() {
		return Err(ApiError::bad_request("Name is required"));
	}
	if !email_pattern().is_match(&body.email) {
		return Err(ApiError::bad_request("Invalid email format"));
	}
	let mut set = doc! { "username": name, "email": &body.email, "updated_at": DateTime::now() };
	if let Some(phone) = body.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
		if !phone_pattern().is_match(phone) {
			return Err(ApiError::bad_request("Invalid Egyptian phone number format"));
		}
		set.insert("phone", phone);
	}

	let taken = db.users().find_one(doc! { "email": &body.email, "_id": { "$ne": caller.id } }, None).await?;
	if taken.is_some() {
		return Err(ApiError::bad_request("Email already registered"));
	}
	let result = db.users().update_one(doc! { "_id": caller.id }, doc! { "$set": set }, None).await?;
	if result.matched_count == 0 {
		return Err(ApiError::not_found("User not found"));
	}
	Ok(Json(json!({ "status": "success", "message": "Profile updated" })))
}

pub async fn listed_cars(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let listings = listings_owned_by(&db, &caller).await?;
	log::debug!("found {} listings for {}", listings.len(), caller.id);
	Ok(Json(json!({ "status": "success", "listed_cars": listings, "total": listings.len() })))
}

/// Reads the caller's preferences, storing the defaults on first access.
async fn preferences_of(db: &DbClient, user_id: String) -> ApiResult<UserPreferences> {
	if let Some(preferences) = db.preferences().find_one(doc! { "user_id": &user_id }, None).await? {
		return Ok(preferences);
	}
	let defaults = UserPreferences::defaults_for(user_id);
	db.preferences().insert_one(&defaults, None).await?;
	Ok(defaults)
}

pub async fn get_preferences(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let preferences = preferences_of(&db, caller.id_hex()).await?;
	Ok(Json(json!({ "status": "success", "preferences": preferences })))
}

pub async fn update_preferences(db: State<DbClient>, caller: AuthUser, body: Json<PreferencesUpdate>) -> ApiResult<Json<Value>> {
	let user_id = caller.id_hex();
	let defaults = UserPreferences::defaults_for(user_id.clone());
	let set = body.to_set()?;

	// Fields not being set fall back to the defaults when the document is new.
	let mut on_insert = doc! {};
	for (key, value) in mongodb::bson::to_document(&defaults)? {
		if key != "user_id" && !set.contains_key(&key) {
			on_insert.insert(key, value);
		}
	}
	let options = UpdateOptions::builder().upsert(true).build();
	let mut update = doc! { "$set": set };
	if !on_insert.is_empty() {
		update.insert("$setOnInsert", on_insert);
	}
	db.preferences().update_one(doc! { "user_id": &user_id }, update, options).await?;
	Ok(Json(json!({ "status": "success", "message": "Preferences updated" })))
}

pub async fn export_data(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let user_id = caller.id_hex();
	let listings = listings_owned_by(&db, &caller).await?;
	let favorites = favorites_of(&db, &user_id).await?;
	let preferences = preferences_of(&db, user_id.clone()).await?;
	log::info!("data export for {}", user_id);

	Ok(Json(json!({
		"user_id": user_id,
		"export_date": rfc3339(DateTime::now()),
		"profile": UserView::from(&caller.user),
		"listed_cars": listings,
		"favorite_cars": favorites,
		"preferences": preferences,
	})))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::cars::listing::ListingForm;
	use mongodb::bson::oid::ObjectId;
	use std::collections::HashMap;

	fn view(status: ListingStatus, views: i64) -> ListingView {
		let fields: HashMap<String, String> =
			[("title", "t"), ("make", "Kia"), ("model", "Rio"), ("year", "2019"), ("price", "1")].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
		let mut listing = ListingForm::from_fields(&fields).unwrap().into_listing(ObjectId::new(), Vec::new());
		listing.status = status;
		listing.views = views;
		ListingView::new(listing, "seller".to_owned())
	}

	#[test]
	fn statistics_count_status_and_views() {
		let listings = vec![view(ListingStatus::Active, 3), view(ListingStatus::Sold, 7), view(ListingStatus::Active, 0)];
		let stats = ProfileStatistics::collect(&listings, 4);
		assert_eq!(stats, ProfileStatistics { total_listings: 3, active_listings: 2, sold_cars: 1, favorite_cars_count: 4, total_views: 10 });
	}

	#[test]
	fn preference_update_validates_contact_method() {
		let update = PreferencesUpdate { preferred_contact_method: Some("Pigeon".to_owned()), ..Default::default() };
		assert!(update.to_set().is_err());

		let update = PreferencesUpdate { sms_notifications: Some(true), preferred_contact_method: Some("SMS".to_owned()), ..Default::default() };
		let set = update.to_set().unwrap();
		assert_eq!(set.get_bool("sms_notifications").unwrap(), true);
		assert_eq!(set.get_str("preferred_contact_method").unwrap(), "sms");
		assert!(!set.contains_key("email_notifications"));
	}

	#[test]
	fn default_preferences() {
		let prefs = UserPreferences::defaults_for("u1".to_owned());
		assert!(prefs.email_notifications && prefs.show_phone_number && !prefs.sms_notifications);
		assert_eq!(prefs.preferred_contact_method, "email");
	}
}
