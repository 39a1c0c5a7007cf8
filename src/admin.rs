use axum::{
	extract::{Path, Query, State},
	Json,
};
use futures::TryStreamExt;
use mongodb::{bson::doc, options::FindOptions};
use serde_json::{json, Value};

use crate::{
	cars::{
		handlers::remove_listing,
		query::{search_listings, ListingPage, ListingQuery},
	},
	db_client::{parse_object_id, DbClient},
	error::{ApiError, ApiResult},
	file_server::Uploads,
	users::{AdminUser, User, UserView},
};

/// Admins see every listing, so owner exclusion is ignored.
pub async fn listings(db: State<DbClient>, _admin: AdminUser, Query(params): Query<Vec<(String, String)>>) -> ApiResult<Json<ListingPage>> {
	let mut query = ListingQuery::from_pairs(&params)?;
	query.filter.exclude_owner = None;
	Ok(Json(search_listings(&db, &query).await?))
}

pub async fn users(db: State<DbClient>, _admin: AdminUser) -> ApiResult<Json<Value>> {
	let options = FindOptions::builder().sort(doc! { "created_at": -1, "_id": -1 }).build();
	let users: Vec<User> = db.users().find(doc! {}, options).await?.try_collect().await?;
	let users: Vec<UserView> = users.iter().map(UserView::from).collect();
	Ok(Json(json!({ "users": users, "total": users.len() })))
}

pub async fn delete_listing(
	db: State<DbClient>,
	uploads: State<Uploads>,
	AdminUser(admin): AdminUser,
	Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
	let oid = parse_object_id(&id, "listing")?;
	let listing = db
		.listings()
		.find_one(doc! { "_id": oid }, None)
		.await?
		.ok_or_else(|| ApiError::not_found(format!("Listing {oid} not found")))?;
	log::info!("admin {} deleting listing {}", admin.id, oid);
	remove_listing(&db, &uploads, listing).await?;
	Ok(Json(json!({ "message": "Listing deleted successfully" })))
}
