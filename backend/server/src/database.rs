//! # Redis
//!
//! RAM database backing both the vote ledger and the tally.
//!
//! ## Requirements
//!
//! - Fast lookups of one session's vote on one poll
//! - Atomic increment/decrement of option counts
//! - Uniqueness of `(session, poll)` enforced by the store itself
//!
//! ## Implementation
//!
//! - Ledger: one hash per poll, session id to option id, see [`crate::ledger`]
//! - Tally: one sorted set per poll, option id scored by votes, see [`crate::tally`]
//! - Redis loads operations into a queue, so `HSETNX` and `ZINCRBY` are atomic
//! - A single [`ConnectionManager`] is shared by both stores and reconnects on its own
use std::time::Duration;

use redis::{
    Client, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::info;

pub async fn init_redis(redis_url: &str) -> RedisResult<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    info!("Connected to Redis at {redis_url}");
    Ok(connection_manager)
}
