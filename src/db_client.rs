use std::ops::Deref;

use anyhow::Context;
use mongodb::{
	bson::{doc, oid::ObjectId, DateTime, Document},
	options::ClientOptions,
	Client, Collection, Database, IndexModel,
};

use crate::{
	cars::listing::Listing,
	damage_reports::DamageReport,
	error::{ApiError, ApiResult},
	favorites::FavoriteCar,
	messages::Message,
	profile::UserPreferences,
	users::User,
};

pub const USERS: &str = "users";
pub const CAR_LISTINGS: &str = "car_listings";
pub const MESSAGES: &str = "messages";
pub const FAVORITE_CARS: &str = "favorite_cars";
pub const DAMAGE_REPORTS: &str = "damage_reports";
pub const USER_PREFERENCES: &str = "user_preferences";

/// Process-wide handle on the marketplace database. The driver pools
/// connections internally, so clones are cheap and share one pool.
#[derive(Clone, Debug)]
pub struct DbClient(pub Database);

impl Deref for DbClient {
	type Target = Database;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl DbClient {
	pub fn users(&self) -> Collection<User> {
		self.collection(USERS)
	}

	pub fn listings(&self) -> Collection<Listing> {
		self.collection(CAR_LISTINGS)
	}

	pub fn messages(&self) -> Collection<Message> {
		self.collection(MESSAGES)
	}

	pub fn favorites(&self) -> Collection<FavoriteCar> {
		self.collection(FAVORITE_CARS)
	}

	pub fn damage_reports(&self) -> Collection<DamageReport> {
		self.collection(DAMAGE_REPORTS)
	}

	pub fn preferences(&self) -> Collection<UserPreferences> {
		self.collection(USER_PREFERENCES)
	}
}

/// Builds the client without touching the network; the driver connects on
/// first use.
pub async fn db_client(uri: &str, database: &str) -> anyhow::Result<DbClient> {
	let mut options = ClientOptions::parse(uri).await.context("invalid MongoDB connection string")?;
	options.app_name = Some("souq_server".to_owned());
	let client = Client::with_options(options).context("unable to create MongoDB client")?;
	Ok(DbClient(client.database(database)))
}

pub async fn ensure_indexes(db: &DbClient) -> anyhow::Result<()> {
	let indexes: [(&str, Document); 6] = [
		(CAR_LISTINGS, doc! { "created_at": -1, "_id": -1 }),
		(CAR_LISTINGS, doc! { "price": 1, "_id": 1 }),
		(CAR_LISTINGS, doc! { "owner_id": 1 }),
		(MESSAGES, doc! { "recipient_id": 1, "is_read": 1 }),
		(MESSAGES, doc! { "sender_id": 1, "recipient_id": 1, "created_at": -1 }),
		(DAMAGE_REPORTS, doc! { "user_id": 1, "created_at": -1 }),
	];
	for (collection, keys) in indexes {
		let model = IndexModel::builder().keys(keys).build();
		db.collection::<Document>(collection)
			.create_index(model, None)
			.await
			.with_context(|| format!("failed to create index on {collection}"))?;
	}
	log::info!("indexes ensured on {}", db.name());
	Ok(())
}

/// Parses a hex ObjectId from a path or body value; `what` names the id in
/// the 400 message (`Invalid listing ID`).
pub fn parse_object_id(id: &str, what: &str) -> ApiResult<ObjectId> {
	ObjectId::parse_str(id.trim()).map_err(|_| ApiError::bad_request(format!("Invalid {what} ID")))
}

pub fn rfc3339(dt: DateTime) -> String {
	dt.try_to_rfc3339_string().unwrap_or_else(|_| dt.timestamp_millis().to_string())
}
