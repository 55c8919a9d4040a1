pub mod pool;
pub mod rate_limiter;

pub use pool::create_http_client;
pub use rate_limiter::{RateLimiter, Throttle};
