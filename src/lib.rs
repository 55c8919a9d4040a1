pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod session;
pub mod utils;

pub use api::ConsumerHostClient;
pub use error::{AppError, Result};
pub use gate::{make_cache_key, CacheKeyOptions, GateOptions, RequestGate};
pub use session::{LoginOutcome, SessionManager};
