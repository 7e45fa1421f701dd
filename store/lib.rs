//! Thin abstraction over the Redis-compatible store used by the queue.
//!
//! This crate owns connection pooling only. Everything that knows about the
//! queue's key layout and scripted operations lives in `taskq-queue`.

mod error;

pub use error::Error;
pub use redis::{AsyncCommands, Script};

pub type Connection = deadpool_redis::Connection;

/// A cheaply cloneable handle to a pool of Redis connections.
#[derive(Clone)]
pub struct StorePool(deadpool_redis::Pool);

impl StorePool {
    /// Build a pool from a `redis://` URL, with an optional explicit pool size.
    /// `max_size` defaults to deadpool's own default when not given.
    pub fn new(redis_url: &str, max_size: Option<usize>) -> Result<StorePool, Error> {
        let cfg = deadpool_redis::Config {
            url: Some(redis_url.to_string()),
            connection: None,
            pool: max_size.map(deadpool_redis::PoolConfig::new),
        };

        let pool = cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
        Ok(StorePool(pool))
    }

    /// Build a pool from the `REDIS_URL` environment variable.
    pub fn from_env() -> Result<StorePool, Error> {
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        StorePool::new(&url, None)
    }

    pub async fn get(&self) -> Result<Connection, Error> {
        Ok(self.0.get().await?)
    }
}

impl std::fmt::Debug for StorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePool").finish()
    }
}
