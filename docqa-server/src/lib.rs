//! `docqa-server` serves document question answering over HTTP.
//! Files are uploaded with `POST /upload` and questions asked with `POST /ask`.

pub mod config;
pub mod extract;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use config::ServerConfig;
pub use server::{ApiError, AppState, HttpOptions, app_router, run_server};
