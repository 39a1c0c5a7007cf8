use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::error::ApiError;

pub const TOKEN_LIFETIME_DAYS: i64 = 7;

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, PartialEq)]
pub struct Claims {
	pub sub: String,
	pub iat: i64,
	pub exp: i64,
}

#[derive(Clone)]
pub struct TokenKeys {
	encoding: EncodingKey,
	decoding: DecodingKey,
}

impl TokenKeys {
	pub fn new(secret: &str) -> Self {
		TokenKeys {
			encoding: EncodingKey::from_secret(secret.as_bytes()),
			decoding: DecodingKey::from_secret(secret.as_bytes()),
		}
	}

	pub fn issue(&self, user_id: &str) -> Result<String, ApiError> {
		self.issue_with_lifetime(user_id, Duration::days(TOKEN_LIFETIME_DAYS))
	}

	pub fn issue_with_lifetime(&self, user_id: &str, lifetime: Duration) -> Result<String, ApiError> {
		let now = Utc::now();
		let claims = Claims { sub: user_id.to_owned(), iat: now.timestamp(), exp: (now + lifetime).timestamp() };
		encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
			.map_err(|e| ApiError::internal(format!("Authentication error: {e}")))
	}

	pub fn validate(&self, token: &str) -> Result<Claims, ApiError> {
		let mut validation = Validation::new(Algorithm::HS256);
		validation.leeway = 0;
		match decode::<Claims>(token, &self.decoding, &validation) {
			Ok(data) if data.claims.sub.is_empty() => Err(ApiError::unauthorized("Invalid token format")),
			Ok(data) => Ok(data.claims),
			Err(e) => {
				log::warn!("rejected bearer token: {e}");
				match e.kind() {
					ErrorKind::ExpiredSignature => Err(ApiError::unauthorized("Token expired")),
					_ => Err(ApiError::unauthorized("Invalid token")),
				}
			}
		}
	}
}

impl std::fmt::Debug for TokenKeys {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("TokenKeys(..)")
	}
}

/// Strips an optional `Bearer ` prefix from an Authorization header value.
pub fn bearer_token(header: &str) -> Option<&str> {
	let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer ")).unwrap_or(header).trim();
	(!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn issued_token_validates() {
		let keys = TokenKeys::new("secret");
		let token = keys.issue("64b7f0c2a1b2c3d4e5f60718").unwrap();
		let claims = keys.validate(&token).unwrap();
		assert_eq!(claims.sub, "64b7f0c2a1b2c3d4e5f60718");
		assert_eq!(claims.exp - claims.iat, TOKEN_LIFETIME_DAYS * 24 * 3600);
	}

	#[test]
	fn wrong_key_is_rejected() {
		let token = TokenKeys::new("secret").issue("user").unwrap();
		let err = TokenKeys::new("other").validate(&token).unwrap_err();
		assert!(matches!(err, ApiError::Unauthorized(msg) if msg == "Invalid token"));
	}

	#[test]
	fn expired_token_is_rejected() {
		let keys = TokenKeys::new("secret");
		let token = keys.issue_with_lifetime("user", Duration::minutes(-5)).unwrap();
		let err = keys.validate(&token).unwrap_err();
		assert!(matches!(err, ApiError::Unauthorized(msg) if msg == "Token expired"));
	}

	#[test]
	fn bearer_prefix_is_optional() {
		assert_eq!(bearer_token("Bearer abc"), Some("abc"));
		assert_eq!(bearer_token("abc"), Some("abc"));
		assert_eq!(bearer_token("Bearer "), None);
	}
}
