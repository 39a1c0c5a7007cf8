use std::sync::Arc;

use axum::{
	extract::{DefaultBodyLimit, FromRef},
	http::HeaderValue,
	routing::{delete, get, post, put},
	Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::{
	admin,
	cars::{handlers as cars, suggest},
	config::Config,
	damage_reports as reports,
	db_client::DbClient,
	favorites, file_server,
	file_server::Uploads,
	inference::{car_check, damage, Models},
	messages, profile,
	tokens::TokenKeys,
	users,
};

/// Listing uploads carry several photos in one request.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone, FromRef)]
pub struct AppState {
	pub db: DbClient,
	pub keys: TokenKeys,
	pub config: Arc<Config>,
	pub uploads: Uploads,
	pub models: Arc<Models>,
}

impl AppState {
	pub fn new(db: DbClient, config: Config, models: Models) -> Self {
		AppState {
			keys: TokenKeys::new(&config.jwt_secret()),
			uploads: Uploads::new(config.upload_dir.clone()),
			config: Arc::new(config),
			models: Arc::new(models),
			db,
		}
	}
}

async fn root() -> Json<Value> {
	Json(json!({ "message": "Vehicle Souq API is running" }))
}

fn cors(config: &Config) -> CorsLayer {
	let origin = config.cors_origin.as_deref().and_then(|origin| match HeaderValue::from_str(origin) {
		Ok(value) => Some(value),
		Err(_) => {
			log::warn!("ignoring invalid CORS_ORIGIN {:?}", origin);
			None
		}
	});
	match origin {
		Some(origin) => CorsLayer::new().allow_origin(origin).allow_methods(Any).allow_headers(Any),
		None => CorsLayer::permissive(),
	}
}

pub fn app(state: AppState) -> Router {
	let cors = cors(&state.config);

	Router::new()
		.route("/", get(root))
		// auth
		.route("/signup", post(users::signup))
		.route("/login", post(users::user_login))
		.route("/json-login", post(users::user_login))
		.route("/admin/bootstrap", post(users::bootstrap_admin))
		// listings
		.route("/cars/list", post(cars::create_listing))
		.route("/cars/listings", get(cars::list_listings))
		.route("/cars/my-listings", get(cars::my_listings))
		.route("/cars/suggest", get(suggest::suggest))
		.route("/cars/listing/:id", get(cars::get_listing).put(cars::update_listing).delete(cars::delete_listing))
		.route("/cars/listing/:id/status", put(cars::update_status))
		.route("/images/:file", get(file_server::file_handler))
		// profile
		.route("/profile/profile", get(profile::get_profile).put(profile::update_profile))
		.route("/profile/listed-cars", get(profile::listed_cars))
		.route("/profile/favorite-cars", get(favorites::list_favorites))
		.route("/profile/favorite-cars/:car_id", post(favorites::add_favorite).delete(favorites::remove_favorite))
		.route("/profile/preferences", get(profile::get_preferences).put(profile::update_preferences))
		.route("/profile/export/data", get(profile::export_data))
		// messages
		.route("/messages/send", post(messages::send_message))
		.route("/messages/conversations", get(messages::conversations))
		.route("/messages/unread/count", get(messages::unread_count))
		.route("/messages/:user_id", get(messages::thread))
		.route("/messages/:user_id/mark-read", post(messages::mark_read))
		// admin
		.route("/admin/listings", get(admin::listings))
		.route("/admin/listings/:id", delete(admin::delete_listing))
		.route("/admin/users", get(admin::users))
		// damage reports
		.route("/damage/create-report", post(reports::create_report))
		.route("/damage/update-report/:id/image/:index", post(reports::update_report_image))
		.route("/damage/complete-report/:id", post(reports::complete_report))
		.route("/damage/report/:id", get(reports::get_report).delete(reports::delete_report))
		.route("/damage/reports", get(reports::list_reports))
		// inference
		.route("/damage/detect", post(damage::detect_damage))
		.route("/yolo/check_car", post(car_check::check_car))
		.route("/predict/predict", post(car_check::classify))
		.layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
		.layer(cors)
		.with_state(state)
}
