//! Acquires a lock over a single resource across three Redis-compatible
//! stores, holds it briefly, then releases it.
//!
//! Run with three local Redis instances reachable at the URLs below, e.g.
//! `redis-server --port 6379`, `--port 6380`, `--port 6381`.

use std::sync::Arc;
use std::time::Duration;

use redquorum::{Overrides, RedisStore, Redlock, Settings, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let stores: Vec<Arc<dyn Store>> = vec![
        Arc::new(RedisStore::connect("redis://127.0.0.1:6379").await?),
        Arc::new(RedisStore::connect("redis://127.0.0.1:6380").await?),
        Arc::new(RedisStore::connect("redis://127.0.0.1:6381").await?),
    ];
    let redlock = Redlock::new(stores, Settings::default())?;

    let mut lock = redlock
        .acquire(
            vec!["inventory:sku-42".into()],
            Duration::from_secs(10),
            Overrides::default(),
        )
        .await?;
    println!("acquired lock with value {}", lock.value);

    let result = lock.release(Overrides::default()).await?;
    println!("released after {} attempt(s)", result.attempts.len());

    redlock.quit().await;
    Ok(())
}
