//! # Tally Store
//!
//! Ranked vote counter per poll, derived from the ledger.
//!
//! ## Implementation
//! - Redis sorted set per poll: `poll:{poll_id}:tally`, member option id, score votes
//! - `ZINCRBY` is the only write path during voting, so concurrent adjustments
//!   never lose an update
//! - Unseen options count as 0, `ZINCRBY` assumes 0 if the member does not exist
//! - Losing the set is fine, a recount rebuilds it from the ledger
use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    error::{StoreError, StoreResult},
    models::{PollId, PollOptionId, Standing, rank},
};

const TALLY_TABLE: &str = "tally";

#[async_trait]
pub trait TallyStore: Send + Sync {
    /// Atomically adds `delta` to the option's count and returns the new count.
    async fn adjust(
        &self,
        poll_id: PollId,
        poll_option_id: PollOptionId,
        delta: i64,
    ) -> StoreResult<i64>;

    /// Every counted option of the poll, most votes first.
    async fn standings(&self, poll_id: PollId) -> StoreResult<Vec<Standing>>;

    /// Overwrites the poll's whole tally.
    async fn replace(&self, poll_id: PollId, counts: &HashMap<PollOptionId, i64>)
    -> StoreResult<()>;
}

#[derive(Default)]
pub struct MemoryTally {
    polls: DashMap<PollId, HashMap<PollOptionId, i64>>,
}

impl MemoryTally {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TallyStore for MemoryTally {
    async fn adjust(
        &self,
        poll_id: PollId,
        poll_option_id: PollOptionId,
        delta: i64,
    ) -> StoreResult<i64> {
        // The entry guard holds the shard write lock for the whole update.
        let mut counts = self.polls.entry(poll_id).or_default();
        let count = counts.entry(poll_option_id).or_insert(0);
        *count += delta;

        Ok(*count)
    }

    async fn standings(&self, poll_id: PollId) -> StoreResult<Vec<Standing>> {
        let mut standings: Vec<Standing> = self
            .polls
            .get(&poll_id)
            .map(|counts| {
                counts
                    .iter()
                    .map(|(&poll_option_id, &votes)| Standing {
                        poll_option_id,
                        votes,
                    })
                    .collect()
            })
            .unwrap_or_default();

        rank(&mut standings);
        Ok(standings)
    }

    async fn replace(
        &self,
        poll_id: PollId,
        counts: &HashMap<PollOptionId, i64>,
    ) -> StoreResult<()> {
        self.polls.insert(poll_id, counts.clone());
        Ok(())
    }
}

pub struct RedisTally {
    redis_connection: ConnectionManager,
}

impl RedisTally {
    pub fn new(redis_connection: ConnectionManager) -> Self {
        Self { redis_connection }
    }
}

fn tally_key(poll_id: PollId) -> String {
    format!("poll:{poll_id}:tally")
}

fn parse_member(member: &str) -> StoreResult<PollOptionId> {
    member.parse().map_err(|_| StoreError::Corrupt {
        table: TALLY_TABLE,
        value: member.to_string(),
    })
}

#[async_trait]
impl TallyStore for RedisTally {
    async fn adjust(
        &self,
        poll_id: PollId,
        poll_option_id: PollOptionId,
        delta: i64,
    ) -> StoreResult<i64> {
        let mut conn = self.redis_connection.clone();
        let votes: f64 = conn
            .zincr(tally_key(poll_id), poll_option_id.to_string(), delta)
            .await?;

        Ok(votes as i64)
    }

    async fn standings(&self, poll_id: PollId) -> StoreResult<Vec<Standing>> {
        let mut conn = self.redis_connection.clone();
        let members: Vec<(String, f64)> = conn
            .zrevrange_withscores(tally_key(poll_id), 0, -1)
            .await?;

        let mut standings = members
            .into_iter()
            .map(|(member, score)| {
                Ok(Standing {
                    poll_option_id: parse_member(&member)?,
                    votes: score as i64,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        // Redis breaks score ties by member descending; normalize to ours.
        rank(&mut standings);
        Ok(standings)
    }

    async fn replace(
        &self,
        poll_id: PollId,
        counts: &HashMap<PollOptionId, i64>,
    ) -> StoreResult<()> {
        let key = tally_key(poll_id);
        let members: Vec<(i64, String)> = counts
            .iter()
            .map(|(option, &votes)| (votes, option.to_string()))
            .collect();

        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !members.is_empty() {
            pipe.zadd_multiple(&key, &members).ignore();
        }

        let mut conn = self.redis_connection.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;

    fn poll(n: u128) -> PollId {
        PollId(Uuid::from_u128(n))
    }

    fn option(n: u128) -> PollOptionId {
        PollOptionId(Uuid::from_u128(n))
    }

    #[tokio::test]
    async fn test_unseen_option_starts_at_zero() {
        let tally = MemoryTally::new();

        assert_eq!(tally.adjust(poll(1), option(1), 1).await.unwrap(), 1);
        assert_eq!(tally.adjust(poll(1), option(2), -1).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_adjust_returns_post_update_count() {
        let tally = MemoryTally::new();

        tally.adjust(poll(1), option(1), 1).await.unwrap();
        tally.adjust(poll(1), option(1), 1).await.unwrap();

        assert_eq!(tally.adjust(poll(1), option(1), -1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_polls_are_isolated() {
        let tally = MemoryTally::new();

        tally.adjust(poll(1), option(1), 1).await.unwrap();

        assert!(tally.standings(poll(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_standings_are_ranked() {
        let tally = MemoryTally::new();
        tally.adjust(poll(1), option(1), 1).await.unwrap();
        tally.adjust(poll(1), option(2), 3).await.unwrap();

        let standings = tally.standings(poll(1)).await.unwrap();

        assert_eq!(
            standings,
            vec![
                Standing {
                    poll_option_id: option(2),
                    votes: 3
                },
                Standing {
                    poll_option_id: option(1),
                    votes: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_replace_overwrites_poll() {
        let tally = MemoryTally::new();
        tally.adjust(poll(1), option(1), 5).await.unwrap();

        tally
            .replace(poll(1), &HashMap::from([(option(2), 2)]))
            .await
            .unwrap();

        let standings = tally.standings(poll(1)).await.unwrap();
        assert_eq!(standings.len(), 1);
        assert_eq!(standings[0].poll_option_id, option(2));
    }

    #[test]
    fn test_tally_key_layout() {
        assert_eq!(
            tally_key(poll(1)),
            "poll:00000000-0000-0000-0000-000000000001:tally"
        );
    }

    #[test]
    fn test_stored_member_parsing() {
        assert_eq!(
            parse_member("00000000-0000-0000-0000-000000000002").unwrap(),
            option(2)
        );
        assert!(matches!(
            parse_member("garbage"),
            Err(StoreError::Corrupt { table: "tally", .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adjustments_are_not_lost() {
        let tally = Arc::new(MemoryTally::new());
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..200 {
            let tally = tally.clone();
            tasks.spawn(async move { tally.adjust(poll(1), option(1), 1).await.unwrap() });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }

        assert_eq!(tally.adjust(poll(1), option(1), 0).await.unwrap(), 200);
    }

    #[tokio::test]
    #[ignore = "needs a running redis at REDIS_URL"]
    async fn test_redis_adjust_and_replace() {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            return;
        };
        let tally = RedisTally::new(crate::database::init_redis(&redis_url).await.unwrap());
        let poll_id = PollId(Uuid::new_v4());

        assert_eq!(tally.adjust(poll_id, option(1), 1).await.unwrap(), 1);
        assert_eq!(tally.adjust(poll_id, option(1), 1).await.unwrap(), 2);
        tally
            .replace(poll_id, &HashMap::from([(option(2), 3)]))
            .await
            .unwrap();

        let standings = tally.standings(poll_id).await.unwrap();
        assert_eq!(
            standings,
            vec![Standing {
                poll_option_id: option(2),
                votes: 3
            }]
        );
        tally.replace(poll_id, &HashMap::new()).await.unwrap();
    }
}
