use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Anonymous voter identity, held client-side in a signed cookie.
    SessionId
);
uuid_id!(PollId);
uuid_id!(PollOptionId);

impl SessionId {
    /// Mints a fresh random (v4) identity.
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

/// One ledger row. At most one exists per `(session_id, poll_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub session_id: SessionId,
    pub poll_id: PollId,
    pub poll_option_id: PollOptionId,
}

/// Post-adjustment count of one option, broadcast to live subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyChange {
    pub poll_option_id: PollOptionId,
    pub votes: i64,
}

/// One row of a poll's ranked tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub poll_option_id: PollOptionId,
    pub votes: i64,
}

/// Orders standings by votes descending, ties broken by option id.
pub fn rank(standings: &mut [Standing]) {
    standings.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then_with(|| a.poll_option_id.cmp(&b.poll_option_id))
    });
}
