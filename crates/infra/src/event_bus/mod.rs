//! Event bus implementations beyond the in-memory one in
//! `stockpile-events`.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsEventBus;
