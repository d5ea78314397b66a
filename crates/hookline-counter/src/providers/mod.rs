//! Counter store providers.

pub mod memory;
pub mod redis;

pub use memory::InMemoryCounterStore;
pub use redis::RedisCounterStore;
