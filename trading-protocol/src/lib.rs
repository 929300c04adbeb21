pub mod client;
pub mod keys;
pub mod memory;
pub mod message;
pub mod redis;
pub mod transport;

pub use client::{ClientError, QueueClient};
pub use keys::QueueNames;
pub use memory::MemoryQueue;
pub use message::{TradingOperation, TradingRequest, TradingResponse};
pub use redis::RedisQueue;
pub use transport::QueueTransport;
