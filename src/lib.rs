// Exports the modules shared by the server binary and the integration tests

pub mod codes;
pub mod config;
pub mod db;
pub mod errors;
pub mod geocoder;
pub mod handlers;
pub mod images;
pub mod logger;
pub mod middleware;
pub mod models;
pub mod offers;
pub mod schema;
pub mod services;
pub mod telegram;

// Re-export common types
pub use crate::config::AppConfig;
pub use crate::config::DbPool;
pub use crate::errors::ApiError;
pub use crate::offers::{ApplianceService, OfferService};
pub use crate::services::AccountService;
