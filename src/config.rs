use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use rand::{distributions::Alphanumeric, Rng};

#[derive(Parser, Debug, Clone)]
#[command(name = "souq_server", about = "Used-car marketplace backend")]
pub struct Config {
	#[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
	pub mongodb_uri: String,

	#[arg(long, env = "MONGODB_DATABASE", default_value = "vehicle_souq")]
	pub database: String,

	/// HS256 secret for bearer tokens. A random one is generated when unset,
	/// which invalidates every token on restart.
	#[arg(long, env = "JWT_SECRET_KEY")]
	pub jwt_secret: Option<String>,

	#[arg(long, env = "ADMIN_SECRET")]
	pub admin_secret: Option<String>,

	#[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
	pub bind_addr: SocketAddr,

	#[arg(long, env = "UPLOAD_DIR", default_value = "uploaded_images")]
	pub upload_dir: PathBuf,

	#[arg(long, env = "CORS_ORIGIN")]
	pub cors_origin: Option<String>,

	#[arg(long, env = "CAR_DETECTION_URL")]
	pub car_detection_url: Option<String>,

	#[arg(long, env = "CAR_CLASSIFIER_URL")]
	pub car_classifier_url: Option<String>,

	#[arg(long, env = "DAMAGE_MODEL_URL")]
	pub damage_model_url: Option<String>,
}

impl Config {
	pub fn jwt_secret(&self) -> String {
		match &self.jwt_secret {
			Some(secret) if !secret.is_empty() => secret.clone(),
			_ => {
				log::warn!("JWT_SECRET_KEY not set, using a temporary key; tokens will not survive a restart");
				rand::thread_rng().sample_iter(&Alphanumeric).take(64).map(char::from).collect()
			}
		}
	}

	#[cfg(test)]
	pub fn for_tests() -> Self {
		Config {
			mongodb_uri: "mongodb://localhost:27017".to_owned(),
			database: "vehicle_souq_test".to_owned(),
			jwt_secret: Some("test-secret".to_owned()),
			admin_secret: Some("let-me-in".to_owned()),
			bind_addr: ([127, 0, 0, 1], 0).into(),
			upload_dir: std::env::temp_dir().join("souq_uploads"),
			cors_origin: None,
			car_detection_url: None,
			car_classifier_url: None,
			damage_model_url: None,
		}
	}
}
