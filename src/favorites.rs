use std::collections::HashMap;

use axum::{
	extract::{Path, State},
	Json,
};
use futures::TryStreamExt;
use mongodb::{
	bson::{doc, oid::ObjectId, DateTime},
	options::FindOptions,
};
use serde_json::{json, Value};

use crate::{
	cars::{
		listing::{Listing, ListingView},
		query::{owner_names, with_owner_names},
	},
	db_client::{parse_object_id, rfc3339, DbClient},
	error::{ApiError, ApiResult},
	users::AuthUser,
};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct FavoriteCar {
	pub favorite_id: String,
	pub user_id: String,
	pub car_id: String,
	pub date_added: DateTime,
}

#[derive(serde::Serialize, Debug, Clone)]
pub struct FavoriteView {
	pub favorite_id: String,
	pub car_id: String,
	pub date_added: String,
	/// `None` once the listing itself has been removed.
	pub car: Option<ListingView>,
}

pub(crate) async fn favorites_of(db: &DbClient, user_id: &str) -> ApiResult<Vec<FavoriteView>> {
	let options = FindOptions::builder().sort(doc! { "date_added": -1 }).build();
	let favorites: Vec<FavoriteCar> = db.favorites().find(doc! { "user_id": user_id }, options).await?.try_collect().await?;

	let ids: Vec<ObjectId> = favorites.iter().filter_map(|f| ObjectId::parse_str(&f.car_id).ok()).collect();
	let listings: Vec<Listing> = if ids.is_empty() {
		Vec::new()
	} else {
		db.listings().find(doc! { "_id": { "$in": ids } }, None).await?.try_collect().await?
	};
	let names = owner_names(db, &listings).await?;
	let mut cars: HashMap<String, ListingView> = with_owner_names(listings, &names).into_iter().map(|v| (v.id.clone(), v)).collect();

	Ok(favorites
		.into_iter()
		.map(|f| FavoriteView {
			car: cars.remove(&f.car_id),
			favorite_id: f.favorite_id,
			car_id: f.car_id,
			date_added: rfc3339(f.date_added),
		})
		.collect())
}

pub async fn list_favorites(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let favorites = favorites_of(&db, &caller.id_hex()).await?;
	Ok(Json(json!({ "status": "success", "favorite_cars": favorites, "total": favorites.len() })))
}

/// Adding a car that is already a favorite is a no-op.
pub async fn add_favorite(db: State<DbClient>, caller: AuthUser, Path(car_id): Path<String>) -> ApiResult<Json<Value>> {
	let oid = parse_object_id(&car_id, "listing")?;
	let user_id = caller.id_hex();
	let car_id = oid.to_hex();

	if db.favorites().find_one(doc! { "user_id": &user_id, "car_id": &car_id }, None).await?.is_some() {
		return Ok(Json(json!({ "status": "success", "message": "Already in favorites" })));
	}
	if db.listings().find_one(doc! { "_id": oid }, None).await?.is_none() {
		return Err(ApiError::not_found("Listing not found"));
	}

	let favorite = FavoriteCar {
		favorite_id: uuid::Uuid::new_v4().to_string(),
		user_id,
		car_id,
		date_added: DateTime::now(),
	};
	db.favorites().insert_one(&favorite, None).await?;
	log::debug!("{} favorited {}", favorite.user_id, favorite.car_id);
	Ok(Json(json!({ "status": "success", "message": "Added to favorites" })))
}

pub async fn remove_favorite(db: State<DbClient>, caller: AuthUser, Path(car_id): Path<String>) -> ApiResult<Json<Value>> {
	let result = db.favorites().delete_one(doc! { "user_id": caller.id_hex(), "car_id": car_id.trim() }, None).await?;
	if result.deleted_count == 0 {
		return Err(ApiError::not_found("Not found in favorites"));
	}
	Ok(Json(json!({ "status": "success", "message": "Removed from favorites" })))
}
