//! Rate limiting primitives: the local limiter and the standalone role.

mod backend;
mod counter;
mod limiter;
mod standalone;

pub use backend::{LocalLimiter, RateLimit};
pub use counter::WindowCounter;
pub use limiter::MemoryLimiter;
pub use standalone::Standalone;
