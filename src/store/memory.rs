//! In-memory ballot store.
//!
//! Target deployment is single-instance mode. A single mutex guards all
//! three logical maps (state, voters, ballots) so the whole check-and-insert
//! in `vote` is atomic without any lock-ordering concerns.

use super::{BallotStore, PollResult, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
}

#[derive(Default)]
struct Inner {
    state: HashMap<i64, State>,
    voters: HashMap<i64, HashSet<i64>>,
    ballots: HashMap<i64, Vec<Vec<u8>>>,
}

/// In-memory [`BallotStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BallotStore for MemoryStore {
    async fn start(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state.entry(poll_id).or_insert(State::Open);
        Ok(())
    }

    async fn vote(
        &self,
        _cancel: &CancellationToken,
        poll_id: i64,
        voter_id: i64,
        payload: Vec<u8>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state.get(&poll_id) {
            None => return Err(StoreError::DoesNotExist),
            Some(State::Closed) => return Err(StoreError::Stopped),
            Some(State::Open) => {}
        }
        let voters = inner.voters.entry(poll_id).or_default();
        if voters.contains(&voter_id) {
            return Err(StoreError::DoubleVote);
        }
        voters.insert(voter_id);
        inner.ballots.entry(poll_id).or_default().push(payload);
        Ok(())
    }

    async fn stop(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<PollResult> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state.get(&poll_id) {
            None => return Err(StoreError::DoesNotExist),
            Some(_) => {
                inner.state.insert(poll_id, State::Closed);
            }
        }
        let ballots = inner.ballots.get(&poll_id).cloned().unwrap_or_default();
        let mut voters: Vec<i64> = inner
            .voters
            .get(&poll_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        voters.sort_unstable();
        Ok(PollResult { ballots, voters })
    }

    async fn clear(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state.remove(&poll_id);
        inner.voters.remove(&poll_id);
        inner.ballots.remove(&poll_id);
        Ok(())
    }

    async fn clear_all(&self, _cancel: &CancellationToken) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.state.clear();
        inner.voters.clear();
        inner.ballots.clear();
        Ok(())
    }

    async fn voted(&self, _cancel: &CancellationToken) -> StoreResult<BTreeMap<i64, Vec<i64>>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .voters
            .iter()
            .map(|(poll_id, voters)| {
                let mut v: Vec<i64> = voters.iter().copied().collect();
                v.sort_unstable();
                (*poll_id, v)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn start_is_idempotent_and_closed_is_sticky() {
        let store = MemoryStore::new();
        let c = token();
        store.start(&c, 1).await.unwrap();
        store.start(&c, 1).await.unwrap();
        store.stop(&c, 1).await.unwrap();
        // Start on a closed poll must not reopen it.
        store.start(&c, 1).await.unwrap();
        let err = store
            .vote(&c, 1, 5, b"x".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Stopped));
    }

    #[tokio::test]
    async fn vote_lifecycle() {
        let store = MemoryStore::new();
        let c = token();

        // Absent poll.
        assert!(matches!(
            store.vote(&c, 7, 5, b"Y".to_vec()).await.unwrap_err(),
            StoreError::DoesNotExist
        ));

        store.start(&c, 7).await.unwrap();
        store.vote(&c, 7, 5, b"Y".to_vec()).await.unwrap();

        // Double vote.
        assert!(matches!(
            store.vote(&c, 7, 5, b"Y".to_vec()).await.unwrap_err(),
            StoreError::DoubleVote
        ));

        let result = store.stop(&c, 7).await.unwrap();
        assert_eq!(result.ballots, vec![b"Y".to_vec()]);
        assert_eq!(result.voters, vec![5]);

        // Stopped.
        assert!(matches!(
            store.vote(&c, 7, 6, b"N".to_vec()).await.unwrap_err(),
            StoreError::Stopped
        ));

        // Stop is idempotent.
        let again = store.stop(&c, 7).await.unwrap();
        assert_eq!(again, result);
    }

    #[tokio::test]
    async fn clear_then_start_allows_revoting() {
        let store = MemoryStore::new();
        let c = token();
        store.start(&c, 1).await.unwrap();
        store.vote(&c, 1, 5, b"Y".to_vec()).await.unwrap();
        store.clear(&c, 1).await.unwrap();
        store.start(&c, 1).await.unwrap();
        store.vote(&c, 1, 5, b"Y".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_votes_same_voter_exactly_one_wins() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let c = token();
        store.start(&c, 1).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                store.vote(&c, 1, 42, b"Y".to_vec()).await
            }));
        }
        let results: Vec<_> = futures::future::join_all(handles).await;
        let ok_count = results
            .iter()
            .filter(|r| r.as_ref().unwrap().is_ok())
            .count();
        assert_eq!(ok_count, 1);

        let stopped = store.stop(&c, 1).await.unwrap();
        assert_eq!(stopped.voters, vec![42]);
        assert_eq!(stopped.ballots.len(), 1);
    }

    #[tokio::test]
    async fn ballots_and_voters_cardinality_matches() {
        let store = MemoryStore::new();
        let c = token();
        store.start(&c, 1).await.unwrap();
        for voter in 1..=10 {
            store.vote(&c, 1, voter, b"Y".to_vec()).await.unwrap();
        }
        let result = store.stop(&c, 1).await.unwrap();
        assert_eq!(result.ballots.len(), result.voters.len());
    }
}
