pub mod auth_handlers;
pub mod extractors;
pub mod health_handlers;
pub mod upload_handlers;
