pub mod admin;
pub mod cars;
pub mod config;
pub mod damage_reports;
pub mod db_client;
pub mod error;
pub mod favorites;
pub mod file_server;
pub mod inference;
pub mod messages;
pub mod profile;
pub mod server;
pub mod tokens;
pub mod users;
