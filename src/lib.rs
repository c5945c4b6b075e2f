mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod chat_service;
pub mod classification;
pub mod config;
pub mod model_service;
pub mod ort_service;
pub mod preprocessing;
pub mod prompt;

pub use app::start_app;
