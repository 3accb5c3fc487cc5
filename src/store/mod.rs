//! Ballot Store (C1): atomic per-poll ballot storage.
//!
//! Three interchangeable implementations share this contract: an in-process
//! [`memory::MemoryStore`], a Lua-scripted cache-backed
//! [`keyspace::KeyspaceStore`] ("fast"), and a transactional relational
//! [`relational::RelationalStore`] ("long"). [`memory::MemoryStore`] also
//! doubles as the test fixture for the higher layers' unit tests.

pub mod keyspace;
pub mod memory;
pub mod relational;

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Low-level ballot store error. Deliberately narrower than [`crate::error::ServiceError`]:
/// the store only ever reports the three poll-lifecycle violations it is
/// positioned to detect, plus an opaque infrastructure failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("poll does not exist")]
    DoesNotExist,
    #[error("poll is stopped")]
    Stopped,
    #[error("voter has already voted")]
    DoubleVote,
    #[error("store operation failed: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The ballots and voter ids returned by `stop`/a `Voted` snapshot for one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollResult {
    pub ballots: Vec<Vec<u8>>,
    /// Sorted ascending.
    pub voters: Vec<i64>,
}

#[async_trait]
pub trait BallotStore: Send + Sync {
    /// Idempotent: absent -> open, open -> open, closed -> closed (sticky).
    async fn start(&self, cancel: &CancellationToken, poll_id: i64) -> StoreResult<()>;

    /// Atomic check-and-insert: accepted iff the poll is open and the voter
    /// has not yet voted, otherwise fails with the narrowest applicable
    /// `StoreError` variant.
    async fn vote(
        &self,
        cancel: &CancellationToken,
        poll_id: i64,
        voter_id: i64,
        payload: Vec<u8>,
    ) -> StoreResult<()>;

    /// absent -> DoesNotExist; open -> closed + returns data; closed -> returns
    /// the same data again (idempotent).
    async fn stop(&self, cancel: &CancellationToken, poll_id: i64) -> StoreResult<PollResult>;

    /// Removes all state for this poll. Idempotent, never fails.
    async fn clear(&self, cancel: &CancellationToken, poll_id: i64) -> StoreResult<()>;

    /// Removes state for every poll.
    async fn clear_all(&self, cancel: &CancellationToken) -> StoreResult<()>;

    /// Snapshot of all live polls' sorted voter ids. May lag concurrent writers.
    async fn voted(&self, cancel: &CancellationToken) -> StoreResult<BTreeMap<i64, Vec<i64>>>;
}
