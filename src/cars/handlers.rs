use axum::{
	extract::{Multipart, Path, Query, State},
	Json,
};
use futures::TryStreamExt;
use hyper::StatusCode;
use mongodb::{
	bson::{doc, DateTime},
	options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};
use serde_json::{json, Value};

use crate::{
	cars::{
		listing::{owned_by, Listing, ListingForm, ListingStatus, ListingUpdate, ListingView},
		query::{owner_names, search_listings, with_owner_names, ListingPage, ListingQuery},
	},
	db_client::{parse_object_id, DbClient},
	error::{ApiError, ApiResult},
	file_server::{read_form, Uploads},
	users::AuthUser,
};

pub async fn list_listings(db: State<DbClient>, Query(params): Query<Vec<(String, String)>>) -> ApiResult<Json<ListingPage>> {
	let query = ListingQuery::from_pairs(&params)?;
	Ok(Json(search_listings(&db, &query).await?))
}

pub async fn create_listing(
	db: State<DbClient>,
	uploads: State<Uploads>,
	caller: AuthUser,
	multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
	let form = read_form(multipart).await?;
	let listing = ListingForm::from_fields(&form.fields)?;
	if form.files.is_empty() {
		return Err(ApiError::bad_request("At least one image is required"));
	}

	let mut images = Vec::with_capacity(form.files.len());
	for (_, data) in &form.files {
		match uploads.save_image(data).await {
			Ok(name) => images.push(name),
			Err(e) => {
				for name in &images {
					uploads.delete(name).await;
				}
				return Err(e);
			}
		}
	}

	let listing = listing.into_listing(caller.id, images);
	let inserted = db.listings().insert_one(&listing, None).await?;
	let listing_id = inserted.inserted_id.as_object_id().map(|id| id.to_hex()).unwrap_or_default();
	log::info!("listing {} created by {} with {} images", listing_id, caller.id, listing.images.len());

	Ok((
		StatusCode::CREATED,
		Json(json!({ "message": "Car listing created successfully", "car_listing_id": listing_id })),
	))
}

pub async fn get_listing(db: State<DbClient>, Path(id): Path<String>) -> ApiResult<Json<ListingView>> {
	let oid = parse_object_id(&id, "listing")?;
	let options = FindOneAndUpdateOptions::builder().return_document(ReturnDocument::After).build();
	let listing = db
		.listings()
		.find_one_and_update(doc! { "_id": oid }, doc! { "$inc": { "views": 1 } }, options)
		.await?
		.ok_or_else(|| ApiError::not_found("Listing not found"))?;

	let names = owner_names(&db, std::slice::from_ref(&listing)).await?;
	Ok(Json(with_owner_names(vec![listing], &names).remove(0)))
}

pub async fn my_listings(db: State<DbClient>, caller: AuthUser) -> ApiResult<Json<Value>> {
	let listings = listings_owned_by(&db, &caller).await?;
	Ok(Json(json!({ "listings": listings, "total": listings.len() })))
}

pub(crate) async fn listings_owned_by(db: &DbClient, caller: &AuthUser) -> ApiResult<Vec<ListingView>> {
	let options = FindOptions::builder().sort(doc! { "created_at": -1, "_id": -1 }).build();
	let listings: Vec<Listing> = db.listings().find(owned_by(caller.id), options).await?.try_collect().await?;
	Ok(listings.into_iter().map(|l| ListingView::new(l, caller.user.username.clone())).collect())
}

/// Loads a listing and checks that `caller` owns it.
async fn owned_listing(db: &DbClient, id: &str, caller: &AuthUser) -> ApiResult<Listing> {
	let oid = parse_object_id(id, "listing")?;
	let listing = db.listings().find_one(doc! { "_id": oid }, None).await?.ok_or_else(|| ApiError::not_found("Listing not found"))?;
	if !listing.is_owned_by(caller.id) {
		log::warn!("user {} tried to modify listing {} owned by {}", caller.id, oid, listing.owner_key());
		return Err(ApiError::Forbidden("You can only modify your own listings".to_owned()));
	}
	Ok(listing)
}

pub async fn update_listing(
	db: State<DbClient>,
	caller: AuthUser,
	Path(id): Path<String>,
	update: Json<ListingUpdate>,
) -> ApiResult<Json<Value>> {
	let set = update.to_set()?;
	let listing = owned_listing(&db, &id, &caller).await?;
	db.listings().update_one(doc! { "_id": listing.id }, doc! { "$set": set }, None).await?;
	Ok(Json(json!({ "status": "success", "message": "Listing updated" })))
}

#[derive(serde::Deserialize, Debug)]
pub struct StatusChange {
	pub status: String,
}

pub async fn update_status(
	db: State<DbClient>,
	caller: AuthUser,
	Path(id): Path<String>,
	change: Json<StatusChange>,
) -> ApiResult<Json<Value>> {
	let status = ListingStatus::parse(&change.status).ok_or_else(|| ApiError::bad_request("Status must be Active or Sold"))?;
	let listing = owned_listing(&db, &id, &caller).await?;
	db.listings()
		.update_one(
			doc! { "_id": listing.id },
			doc! { "$set": { "status": status.as_str(), "updated_at": DateTime::now() } },
			None,
		)
		.await?;
	Ok(Json(json!({ "status": "success", "message": format!("Status updated to {}", status.as_str()) })))
}

pub async fn delete_listing(
	db: State<DbClient>,
	uploads: State<Uploads>,
	caller: AuthUser,
	Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
	let listing = owned_listing(&db, &id, &caller).await?;
	remove_listing(&db, &uploads, listing).await?;
	Ok(Json(json!({ "status": "success", "message": "Car deleted successfully" })))
}

/// Deletes the document, its favorites, and its stored images.
pub(crate) async fn remove_listing(db: &DbClient, uploads: &Uploads, listing: Listing) -> ApiResult<()> {
	let Some(oid) = listing.id else {
		return Err(ApiError::internal("listing document without _id"));
	};
	db.listings().delete_one(doc! { "_id": oid }, None).await?;
	db.favorites().delete_many(doc! { "car_id": oid.to_hex() }, None).await?;
	for image in &listing.images {
		uploads.delete(image).await;
	}
	log::info!("listing {} deleted", oid);
	Ok(())
}
