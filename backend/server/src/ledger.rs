//! # Vote Ledger
//!
//! Ground truth of who voted for what: one row per `(session, poll)`.
//!
//! ## Uniqueness
//! The store itself rejects a second row for the same key. The coordinator
//! looks a row up before inserting, but that read only exists to answer
//! "you already voted" quickly; two racing inserts are settled here.
//!
//! ## Redis layout
//! - One hash per poll: `poll:{poll_id}:votes`
//! - Field: session id, value: option id
//! - `HSETNX` for insert, so the constraint holds across processes
use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    error::{StoreError, StoreResult},
    models::{PollId, PollOptionId, SessionId, Vote},
};

const VOTES_TABLE: &str = "votes";

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Returns `Ok(None)` when the session has not voted on the poll.
    async fn find(&self, session_id: SessionId, poll_id: PollId) -> StoreResult<Option<Vote>>;

    /// Fails with [`StoreError::DuplicateKey`] if a row already exists for the key.
    async fn insert(&self, vote: Vote) -> StoreResult<()>;

    /// No-op if the row does not exist.
    async fn delete(&self, session_id: SessionId, poll_id: PollId) -> StoreResult<()>;

    async fn votes_for_poll(&self, poll_id: PollId) -> StoreResult<Vec<Vote>>;
}

fn duplicate(session_id: SessionId, poll_id: PollId) -> StoreError {
    StoreError::DuplicateKey {
        table: VOTES_TABLE,
        key: format!("{session_id}:{poll_id}"),
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    rows: DashMap<(SessionId, PollId), PollOptionId>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn find(&self, session_id: SessionId, poll_id: PollId) -> StoreResult<Option<Vote>> {
        Ok(self
            .rows
            .get(&(session_id, poll_id))
            .map(|option| Vote {
                session_id,
                poll_id,
                poll_option_id: *option,
            }))
    }

    async fn insert(&self, vote: Vote) -> StoreResult<()> {
        match self.rows.entry((vote.session_id, vote.poll_id)) {
            Entry::Occupied(_) => Err(duplicate(vote.session_id, vote.poll_id)),
            Entry::Vacant(entry) => {
                entry.insert(vote.poll_option_id);
                Ok(())
            }
        }
    }

    async fn delete(&self, session_id: SessionId, poll_id: PollId) -> StoreResult<()> {
        self.rows.remove(&(session_id, poll_id));
        Ok(())
    }

    async fn votes_for_poll(&self, poll_id: PollId) -> StoreResult<Vec<Vote>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.key().1 == poll_id)
            .map(|row| Vote {
                session_id: row.key().0,
                poll_id,
                poll_option_id: *row.value(),
            })
            .collect())
    }
}

pub struct RedisLedger {
    redis_connection: ConnectionManager,
}

impl RedisLedger {
    pub fn new(redis_connection: ConnectionManager) -> Self {
        Self { redis_connection }
    }
}

fn votes_key(poll_id: PollId) -> String {
    format!("poll:{poll_id}:votes")
}

fn parse_id<T: std::str::FromStr>(value: &str) -> StoreResult<T> {
    value.parse().map_err(|_| StoreError::Corrupt {
        table: VOTES_TABLE,
        value: value.to_string(),
    })
}

#[async_trait]
impl Ledger for RedisLedger {
    async fn find(&self, session_id: SessionId, poll_id: PollId) -> StoreResult<Option<Vote>> {
        let mut conn = self.redis_connection.clone();
        let option: Option<String> = conn
            .hget(votes_key(poll_id), session_id.to_string())
            .await?;

        option
            .map(|option| {
                Ok(Vote {
                    session_id,
                    poll_id,
                    poll_option_id: parse_id(&option)?,
                })
            })
            .transpose()
    }

    async fn insert(&self, vote: Vote) -> StoreResult<()> {
        let mut conn = self.redis_connection.clone();
        let inserted: bool = conn
            .hset_nx(
                votes_key(vote.poll_id),
                vote.session_id.to_string(),
                vote.poll_option_id.to_string(),
            )
            .await?;

        if inserted {
            Ok(())
        } else {
            Err(duplicate(vote.session_id, vote.poll_id))
        }
    }

    async fn delete(&self, session_id: SessionId, poll_id: PollId) -> StoreResult<()> {
        let mut conn = self.redis_connection.clone();
        let _: () = conn
            .hdel(votes_key(poll_id), session_id.to_string())
            .await?;

        Ok(())
    }

    async fn votes_for_poll(&self, poll_id: PollId) -> StoreResult<Vec<Vote>> {
        let mut conn = self.redis_connection.clone();
        let rows: HashMap<String, String> = conn.hgetall(votes_key(poll_id)).await?;

        rows.iter()
            .map(|(session_id, option)| {
                Ok(Vote {
                    session_id: parse_id(session_id)?,
                    poll_id,
                    poll_option_id: parse_id(option)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn vote(session: u128, poll: u128, option: u128) -> Vote {
        Vote {
            session_id: SessionId(Uuid::from_u128(session)),
            poll_id: PollId(Uuid::from_u128(poll)),
            poll_option_id: PollOptionId(Uuid::from_u128(option)),
        }
    }

    #[tokio::test]
    async fn test_find_missing_is_none() {
        let ledger = MemoryLedger::new();
        let v = vote(1, 1, 1);

        assert_eq!(ledger.find(v.session_id, v.poll_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let ledger = MemoryLedger::new();
        let v = vote(1, 1, 7);

        ledger.insert(v).await.unwrap();

        assert_eq!(ledger.find(v.session_id, v.poll_id).await.unwrap(), Some(v));
    }

    #[tokio::test]
    async fn test_second_insert_for_key_is_rejected() {
        let ledger = MemoryLedger::new();
        ledger.insert(vote(1, 1, 7)).await.unwrap();

        let result = ledger.insert(vote(1, 1, 8)).await;

        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
        let kept = ledger
            .find(SessionId(Uuid::from_u128(1)), PollId(Uuid::from_u128(1)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(kept.poll_option_id, PollOptionId(Uuid::from_u128(7)));
    }

    #[tokio::test]
    async fn test_same_session_on_other_poll_is_independent() {
        let ledger = MemoryLedger::new();

        ledger.insert(vote(1, 1, 7)).await.unwrap();
        ledger.insert(vote(1, 2, 7)).await.unwrap();

        assert_eq!(ledger.votes_for_poll(PollId(Uuid::from_u128(2))).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let ledger = MemoryLedger::new();
        let v = vote(1, 1, 7);
        ledger.insert(v).await.unwrap();

        ledger.delete(v.session_id, v.poll_id).await.unwrap();
        ledger.delete(v.session_id, v.poll_id).await.unwrap();

        assert_eq!(ledger.find(v.session_id, v.poll_id).await.unwrap(), None);
        ledger.insert(v).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_inserts_for_one_key_admit_exactly_one() {
        let ledger = std::sync::Arc::new(MemoryLedger::new());
        let mut tasks = tokio::task::JoinSet::new();

        for option in 0..16 {
            let ledger = ledger.clone();
            tasks.spawn(async move { ledger.insert(vote(1, 1, option)).await.is_ok() });
        }

        let mut accepted = 0;
        while let Some(ok) = tasks.join_next().await {
            if ok.unwrap() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_votes_key_layout() {
        assert_eq!(
            votes_key(PollId(Uuid::from_u128(1))),
            "poll:00000000-0000-0000-0000-000000000001:votes"
        );
    }

    #[test]
    fn test_stored_id_parsing() {
        let session: SessionId = parse_id("00000000-0000-0000-0000-000000000003").unwrap();
        assert_eq!(session, SessionId(Uuid::from_u128(3)));

        let bad = parse_id::<PollOptionId>("not-an-id");
        assert!(matches!(bad, Err(StoreError::Corrupt { table: "votes", .. })));
    }

    #[tokio::test]
    #[ignore = "needs a running redis at REDIS_URL"]
    async fn test_redis_insert_is_unique() {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            return;
        };
        let ledger = RedisLedger::new(crate::database::init_redis(&redis_url).await.unwrap());
        let v = vote(Uuid::new_v4().as_u128(), Uuid::new_v4().as_u128(), 7);

        ledger.insert(v).await.unwrap();
        let again = ledger.insert(vote(v.session_id.0.as_u128(), v.poll_id.0.as_u128(), 8)).await;

        assert!(matches!(again, Err(StoreError::DuplicateKey { .. })));
        assert_eq!(ledger.find(v.session_id, v.poll_id).await.unwrap(), Some(v));
        assert_eq!(ledger.votes_for_poll(v.poll_id).await.unwrap(), vec![v]);

        ledger.delete(v.session_id, v.poll_id).await.unwrap();
        assert_eq!(ledger.find(v.session_id, v.poll_id).await.unwrap(), None);
    }
}
