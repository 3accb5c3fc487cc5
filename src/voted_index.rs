//! Voted Index (C5): an in-process `pollId -> sorted voterIds` mirror, the
//! only process-global mutable state in the service. Seeded from both
//! ballot stores at startup, kept live by successful votes, and optionally
//! reconciled on a timer in multi-instance deployments.

use crate::store::BallotStore;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct State {
    voted: HashMap<i64, Vec<i64>>,
}

pub struct VotedIndex {
    state: Mutex<State>,
}

impl Default for VotedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VotedIndex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Union both backends' `voted` snapshots into the index. Called once at
    /// startup and, in multi-instance mode, on every reload tick.
    pub async fn reload(
        &self,
        cancel: &CancellationToken,
        fast: &dyn BallotStore,
        long: &dyn BallotStore,
    ) -> Result<(), crate::store::StoreError> {
        let fast_snapshot = fast.voted(cancel).await?;
        let long_snapshot = long.voted(cancel).await?;
        let mut merged: BTreeMap<i64, HashSet<i64>> = BTreeMap::new();
        for snapshot in [fast_snapshot, long_snapshot] {
            for (poll_id, voters) in snapshot {
                merged.entry(poll_id).or_default().extend(voters);
            }
        }
        let mut state = self.state.lock().unwrap();
        state.voted = merged
            .into_iter()
            .map(|(poll_id, voters)| {
                let mut v: Vec<i64> = voters.into_iter().collect();
                v.sort_unstable();
                (poll_id, v)
            })
            .collect();
        Ok(())
    }

    /// Spawn the background reload task used when more than one instance of
    /// this service shares the same backends. Not started in single-instance
    /// deployments, which stay strictly consistent without the reload cost.
    pub fn spawn_reload_task(
        self: std::sync::Arc<Self>,
        fast: std::sync::Arc<dyn BallotStore>,
        long: std::sync::Arc<dyn BallotStore>,
        period: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(err) = self.reload(&cancel, fast.as_ref(), long.as_ref()).await {
                            tracing::warn!(error = %err, "voted index reload failed");
                        }
                    }
                }
            }
        })
    }

    pub fn record_vote(&self, poll_id: i64, voter_id: i64) {
        let mut state = self.state.lock().unwrap();
        let voters = state.voted.entry(poll_id).or_default();
        if let Err(pos) = voters.binary_search(&voter_id) {
            voters.insert(pos, voter_id);
        }
    }

    pub fn clear_poll(&self, poll_id: i64) {
        self.state.lock().unwrap().voted.remove(&poll_id);
    }

    pub fn clear_all(&self) {
        self.state.lock().unwrap().voted.clear();
    }

    /// For each of `poll_ids`, the subset of `eligible` (typically
    /// `requestUser` plus anyone who has delegated their vote to them) that
    /// has already voted. Polls absent from the index map to an empty
    /// sequence rather than being omitted.
    pub fn voted(&self, poll_ids: &[i64], eligible: &HashSet<i64>) -> HashMap<i64, Vec<i64>> {
        let state = self.state.lock().unwrap();
        poll_ids
            .iter()
            .map(|poll_id| {
                let matches = state
                    .voted
                    .get(poll_id)
                    .map(|voters| {
                        let mut v: Vec<i64> = voters
                            .iter()
                            .copied()
                            .filter(|v| eligible.contains(v))
                            .collect();
                        v.sort_unstable();
                        v
                    })
                    .unwrap_or_default();
                (*poll_id, matches)
            })
            .collect()
    }

    /// Full `pollId -> voterIds` dump, used to seed the streaming endpoint's
    /// initial snapshot and to diff against on every subsequent tick.
    pub fn snapshot(&self) -> HashMap<i64, Vec<i64>> {
        self.state.lock().unwrap().voted.clone()
    }

    pub fn vote_count(&self) -> HashMap<i64, usize> {
        self.state
            .lock()
            .unwrap()
            .voted
            .iter()
            .map(|(poll_id, voters)| (*poll_id, voters.len()))
            .collect()
    }
}
