use std::sync::OnceLock;

use argon2::{
	password_hash::{rand_core::OsRng, SaltString},
	Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{
	async_trait,
	extract::{FromRef, FromRequestParts, State},
	http::{header::AUTHORIZATION, request::Parts},
	Json,
};
use mongodb::bson::{doc, oid::ObjectId, DateTime};
use regex::Regex;
use serde_json::{json, Value};

use crate::{
	config::Config,
	db_client::{parse_object_id, DbClient},
	error::{ApiError, ApiResult},
	server::AppState,
	tokens::{bearer_token, TokenKeys},
};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	#[default]
	User,
	Admin,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct User {
	#[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
	pub id: Option<ObjectId>,
	pub username: String,
	pub email: String,
	pub password: String,
	#[serde(default)]
	pub phone: Option<String>,
	#[serde(default)]
	pub role: Role,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<DateTime>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<DateTime>,
}

/// User as exposed over the API: no password hash.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct UserView {
	#[serde(rename = "_id")]
	pub id: String,
	pub username: String,
	pub email: String,
	pub phone: Option<String>,
	pub role: Role,
	pub created_at: Option<String>,
}

impl From<&User> for UserView {
	fn from(user: &User) -> Self {
		UserView {
			id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
			username: user.username.clone(),
			email: user.email.clone(),
			phone: user.phone.clone(),
			role: user.role,
			created_at: user.created_at.and_then(|t| t.try_to_rfc3339_string().ok()),
		}
	}
}

#[derive(serde::Deserialize, Debug)]
pub struct SignUp {
	pub username: String,
	pub email: String,
	pub password: String,
	pub phone: String,
}

#[derive(serde::Deserialize, Debug)]
pub struct Logins {
	pub email: String,
	pub password: String,
}

#[derive(serde::Serialize, Debug)]
pub struct Token {
	pub access_token: String,
	pub token_type: &'static str,
	pub user_id: String,
	pub username: String,
	pub email: String,
}

pub(crate) fn email_pattern() -> &'static Regex {
	static EMAIL: OnceLock<Regex> = OnceLock::new();
	EMAIL.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").expect("valid email regex"))
}

pub(crate) fn phone_pattern() -> &'static Regex {
	static PHONE: OnceLock<Regex> = OnceLock::new();
	// Egyptian mobile numbers
	PHONE.get_or_init(|| Regex::new(r"^01[0125][0-9]{8}$").expect("valid phone regex"))
}

impl SignUp {
	pub fn validate(&self) -> ApiResult<()> {
		if self.username.trim().is_empty() {
			return Err(ApiError::bad_request("Username is required"));
		}
		if !email_pattern().is_match(&self.email) {
			return Err(ApiError::bad_request("Invalid email format"));
		}
		if !phone_pattern().is_match(&self.phone) {
			return Err(ApiError::bad_request("Invalid Egyptian phone number format"));
		}
		if self.password.chars().count() < 8 {
			return Err(ApiError::bad_request("Password must be at least 8 characters"));
		}
		Ok(())
	}
}

pub fn hash_password(password: &str) -> ApiResult<String> {
	let salt = SaltString::generate(&mut OsRng);
	Argon2::default()
		.hash_password(password.as_bytes(), &salt)
		.map(|hash| hash.to_string())
		.map_err(|e| ApiError::internal(format!("failed to hash password: {e}")))
}

/// Hashes written before the switch to argon2 are bcrypt (`$2a$`, `$2b$`,
/// `$2y$`). They still verify, and [`needs_rehash`] flags them for upgrade.
pub fn verify_password(password: &str, stored: &str) -> bool {
	if is_bcrypt(stored) {
		return bcrypt::verify(password, stored).unwrap_or_else(|e| {
			log::warn!("stored bcrypt hash is malformed: {e}");
			false
		});
	}
	let Ok(parsed) = PasswordHash::new(stored) else {
		log::warn!("stored password is not a valid PHC string");
		return false;
	};
	Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

fn is_bcrypt(stored: &str) -> bool {
	["$2a$", "$2b$", "$2y$"].iter().any(|prefix| stored.starts_with(prefix))
}

pub fn needs_rehash(stored: &str) -> bool {
	is_bcrypt(stored)
}

fn token_response(keys: &TokenKeys, user_id: ObjectId, user: &User) -> ApiResult<Json<Token>> {
	let user_id = user_id.to_hex();
	Ok(Json(Token {
		access_token: keys.issue(&user_id)?,
		token_type: "bearer",
		user_id,
		username: user.username.clone(),
		email: user.email.clone(),
	}))
}

pub async fn signup(db: State<DbClient>, keys: State<TokenKeys>, user: Json<SignUp>) -> ApiResult<Json<Token>> {
	let user = user.0;
	user.validate()?;

	let existing = db.users().find_one(doc! { "$or": [ { "email": &user.email }, { "phone": &user.phone } ] }, None).await?;
	if existing.is_some() {
		return Err(ApiError::bad_request("Email or phone already registered"));
	}

	let now = DateTime::now();
	let mut new_user = User {
		id: None,
		username: user.username,
		email: user.email,
		password: hash_password(&user.password)?,
		phone: Some(user.phone),
		role: Role::User,
		created_at: Some(now),
		updated_at: Some(now),
	};
	let inserted = db.users().insert_one(&new_user, None).await?;
	let user_id = inserted
		.inserted_id
		.as_object_id()
		.ok_or_else(|| ApiError::internal("users insert returned a non-ObjectId key"))?;
	new_user.id = Some(user_id);
	log::info!("new user signed up: {}", user_id);

	token_response(&keys, user_id, &new_user)
}

pub async fn user_login(db: State<DbClient>, keys: State<TokenKeys>, logins: Json<Logins>) -> ApiResult<Json<Token>> {
	let logins = logins.0;
	let rejected = || ApiError::unauthorized("Incorrect email or password");

	let Some(user) = db.users().find_one(doc! { "email": &logins.email }, None).await? else {
		log::warn!("login attempt for unknown email");
		return Err(rejected());
	};
	if !verify_password(&logins.password, &user.password) {
		log::warn!("failed login for {}", logins.email);
		return Err(rejected());
	}
	let user_id = user.id.ok_or_else(|| ApiError::internal("user document without _id"))?;
	if needs_rehash(&user.password) {
		let upgraded = hash_password(&logins.password)?;
		match db.users().update_one(doc! { "_id": user_id }, doc! { "$set": { "password": upgraded } }, None).await {
			Ok(_) => log::info!("upgraded password hash of {} to argon2", user_id),
			Err(e) => log::warn!("could not upgrade password hash of {}: {}", user_id, e),
		}
	}
	log::info!("login successful for {}", user_id);
	token_response(&keys, user_id, &user)
}

/// The caller of an endpoint, resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
	pub id: ObjectId,
	pub user: User,
}

impl AuthUser {
	pub fn id_hex(&self) -> String {
		self.id.to_hex()
	}
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
	AppState: FromRef<S>,
	S: Send + Sync,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let state = AppState::from_ref(state);
		let header = parts
			.headers
			.get(AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.ok_or_else(|| ApiError::unauthorized("Authorization header missing"))?;
		let token = bearer_token(header).ok_or_else(|| ApiError::unauthorized("Could not validate credentials"))?;
		let claims = state.keys.validate(token)?;

		let id = ObjectId::parse_str(&claims.sub).map_err(|_| ApiError::unauthorized("Invalid token format"))?;
		let Some(user) = state.db.users().find_one(doc! { "_id": id }, None).await? else {
			log::warn!("token subject {} has no user", id);
			return Err(ApiError::unauthorized("User not found"));
		};
		Ok(AuthUser { id, user })
	}
}

/// An authenticated caller whose role is `admin`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
	AppState: FromRef<S>,
	S: Send + Sync,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let caller = AuthUser::from_request_parts(parts, state).await?;
		if caller.user.role != Role::Admin {
			return Err(ApiError::Forbidden("Insufficient permissions".to_owned()));
		}
		Ok(AdminUser(caller))
	}
}

#[derive(serde::Deserialize, Debug)]
pub struct Bootstrap {
	pub secret: String,
}

pub async fn bootstrap_admin(
	db: State<DbClient>,
	config: State<std::sync::Arc<Config>>,
	caller: AuthUser,
	body: Json<Bootstrap>,
) -> ApiResult<Json<Value>> {
	let Some(expected) = config.admin_secret.as_deref().filter(|s| !s.is_empty()) else {
		return Err(ApiError::not_found("Admin bootstrap is disabled"));
	};
	if body.secret != expected {
		log::warn!("admin bootstrap rejected for {}", caller.id);
		return Err(ApiError::Forbidden("Invalid admin secret".to_owned()));
	}
	db.users()
		.update_one(doc! { "_id": caller.id }, doc! { "$set": { "role": "admin", "updated_at": DateTime::now() } }, None)
		.await?;
	log::info!("user {} promoted to admin", caller.id);
	Ok(Json(json!({ "status": "success", "role": "admin" })))
}

/// Looks up a user by its hex id, rejecting malformed ids with 400.
pub async fn find_user(db: &DbClient, id: &str, what: &str) -> ApiResult<(ObjectId, User)> {
	let oid = parse_object_id(id, what)?;
	match db.users().find_one(doc! { "_id": oid }, None).await? {
		Some(user) => Ok((oid, user)),
		None => Err(ApiError::not_found(format!("{} not found", capitalize(what)))),
	}
}

fn capitalize(s: &str) -> String {
	let mut chars = s.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}
