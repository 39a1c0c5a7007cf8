pub mod handlers;
pub mod listing;
pub mod query;
pub mod suggest;
