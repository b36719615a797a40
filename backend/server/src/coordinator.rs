//! # Vote Coordinator
//!
//! Casting a vote, from the ledger's point of view:
//!
//! 1. Session already voted this option: reject with [`VoteError::DuplicateVote`]
//! 2. Session voted another option: delete that row, decrement its count, publish
//! 3. No session yet: mint one for the caller to hand back as a cookie
//! 4. Insert the new row, increment its count, publish
//!
//! A change of vote is always delete + insert, never an in-place update, so
//! every ledger write pairs with exactly one tally adjustment.
//!
//! Ledger and tally failures abort the cast even if an earlier step already
//! committed; [`VoteCoordinator::recount`] repairs the drift that leaves behind.
//! Publish failures are logged and never fail a cast.
//!
//! ## Recount
//! Casts on a poll share its lock, a recount holds it exclusively. A cast can
//! not land between the recount's ledger read and its tally rewrite. The lock
//! lives in this process only.
use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    error::{StoreResult, VoteError},
    ledger::Ledger,
    models::{PollId, PollOptionId, SessionId, Standing, TallyChange, Vote, rank},
    publisher::{Publisher, TallyStream},
    tally::TallyStore,
};

/// A vote was recorded, either new or switched from another option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Changed {
    /// Set only when the caller came without a session and one was minted.
    pub new_session_id: Option<SessionId>,
}

#[derive(Clone)]
pub struct VoteCoordinator {
    ledger: Arc<dyn Ledger>,
    tally: Arc<dyn TallyStore>,
    publisher: Arc<dyn Publisher>,
    poll_locks: Arc<DashMap<PollId, Arc<RwLock<()>>>>,
}

impl VoteCoordinator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        tally: Arc<dyn TallyStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            ledger,
            tally,
            publisher,
            poll_locks: Arc::new(DashMap::new()),
        }
    }

    fn poll_lock(&self, poll_id: PollId) -> Arc<RwLock<()>> {
        self.poll_locks.entry(poll_id).or_default().clone()
    }

    pub async fn cast_vote(
        &self,
        session_id: Option<SessionId>,
        poll_id: PollId,
        poll_option_id: PollOptionId,
    ) -> Result<Changed, VoteError> {
        let lock = self.poll_lock(poll_id);
        let _cast = lock.read().await;

        let (session_id, new_session_id) = match session_id {
            Some(session_id) => {
                if let Some(previous) = self.ledger.find(session_id, poll_id).await? {
                    if previous.poll_option_id == poll_option_id {
                        debug!("Session {session_id} already voted {poll_option_id} on {poll_id}");
                        return Err(VoteError::DuplicateVote);
                    }

                    self.ledger.delete(session_id, poll_id).await?;
                    self.adjust_and_publish(poll_id, previous.poll_option_id, -1)
                        .await?;
                }

                (session_id, None)
            }
            None => {
                let minted = SessionId::mint();
                debug!("Minted session {minted}");

                (minted, Some(minted))
            }
        };

        self.ledger
            .insert(Vote {
                session_id,
                poll_id,
                poll_option_id,
            })
            .await?;
        self.adjust_and_publish(poll_id, poll_option_id, 1).await?;

        Ok(Changed { new_session_id })
    }

    async fn adjust_and_publish(
        &self,
        poll_id: PollId,
        poll_option_id: PollOptionId,
        delta: i64,
    ) -> StoreResult<i64> {
        let votes = self.tally.adjust(poll_id, poll_option_id, delta).await?;
        debug!("Poll {poll_id} option {poll_option_id} adjusted by {delta} to {votes}");

        let change = TallyChange {
            poll_option_id,
            votes,
        };
        if let Err(err) = self.publisher.publish(poll_id, change) {
            warn!("{err}");
        }

        Ok(votes)
    }

    pub fn subscribe(&self, poll_id: PollId) -> TallyStream {
        self.publisher.subscribe(poll_id)
    }

    pub async fn standings(&self, poll_id: PollId) -> StoreResult<Vec<Standing>> {
        self.tally.standings(poll_id).await
    }

    /// Rebuilds the poll's tally from the ledger and returns the fresh standings.
    pub async fn recount(&self, poll_id: PollId) -> StoreResult<Vec<Standing>> {
        let lock = self.poll_lock(poll_id);
        let _recount = lock.write().await;

        let mut counts: HashMap<PollOptionId, i64> = HashMap::new();
        for vote in self.ledger.votes_for_poll(poll_id).await? {
            *counts.entry(vote.poll_option_id).or_insert(0) += 1;
        }

        self.tally.replace(poll_id, &counts).await?;
        info!("Recounted poll {poll_id}: {} options", counts.len());

        let mut standings: Vec<Standing> = counts
            .into_iter()
            .map(|(poll_option_id, votes)| Standing {
                poll_option_id,
                votes,
            })
            .collect();
        rank(&mut standings);

        Ok(standings)
    }
}
