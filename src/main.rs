use anyhow::Context;
use clap::Parser;
use souq_server::{
	config::Config,
	db_client::{db_client, ensure_indexes},
	inference::Models,
	server::{app, AppState},
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	dotenvy::dotenv().ok();
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	let config = Config::parse();
	let db = db_client(&config.mongodb_uri, &config.database).await?;
	if let Err(e) = ensure_indexes(&db).await {
		log::warn!("could not ensure indexes: {:#}", e);
	}

	let models = Models::load(&config).await.context("failed to set up inference clients")?;
	let state = AppState::new(db, config, models);
	state.uploads.ensure().await?;

	let addr = state.config.bind_addr;
	let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
	log::info!("listening on {}", addr);
	axum::serve(listener, app(state)).await.context("server error")?;
	Ok(())
}
