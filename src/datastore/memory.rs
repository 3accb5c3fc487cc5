//! In-memory datastore fixture: a stand-in for the real object store, used
//! by tests and for local development. Also counts round trips so tests
//! can assert that voting after a poll's preload issues zero new reads.

use super::{Datastore, DatastoreResult, RawMeeting, RawMeetingUser, RawPoll, RawUser, UserDetails};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    polls: HashMap<i64, RawPoll>,
    meetings: HashMap<i64, RawMeeting>,
    meeting_users: HashMap<(i64, i64), RawMeetingUser>,
    users: HashMap<i64, RawUser>,
    presence: HashMap<i64, HashSet<i64>>,
}

/// In-memory [`Datastore`] fixture.
#[derive(Default)]
pub struct InMemoryDatastore {
    state: Mutex<State>,
    calls: AtomicU64,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn insert_poll(&self, poll: RawPoll) {
        self.state.lock().unwrap().polls.insert(poll.id, poll);
    }

    pub fn insert_meeting(&self, meeting_id: i64, meeting: RawMeeting) {
        self.state.lock().unwrap().meetings.insert(meeting_id, meeting);
    }

    pub fn insert_meeting_user(&self, meeting_id: i64, user_id: i64, mu: RawMeetingUser) {
        self.state
            .lock()
            .unwrap()
            .meeting_users
            .insert((meeting_id, user_id), mu);
    }

    pub fn insert_user(&self, user_id: i64, user: RawUser) {
        self.state.lock().unwrap().users.insert(user_id, user);
    }

    pub fn set_present(&self, meeting_id: i64, user_id: i64) {
        self.state
            .lock()
            .unwrap()
            .presence
            .entry(meeting_id)
            .or_default()
            .insert(user_id);
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn fetch_polls(&self, ids: &[i64]) -> DatastoreResult<HashMap<i64, RawPoll>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.polls.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn fetch_meetings(&self, ids: &[i64]) -> DatastoreResult<HashMap<i64, RawMeeting>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.meetings.get(id).map(|m| (*id, m.clone())))
            .collect())
    }

    async fn fetch_group_members(
        &self,
        meeting_id: i64,
        group_ids: &[i64],
    ) -> DatastoreResult<Vec<i64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let mut members: Vec<i64> = state
            .meeting_users
            .iter()
            .filter(|((mid, _), mu)| {
                *mid == meeting_id && mu.group_ids.iter().any(|g| group_ids.contains(g))
            })
            .map(|((_, uid), _)| *uid)
            .collect();
        members.sort_unstable();
        members.dedup();
        Ok(members)
    }

    async fn fetch_meeting_users(
        &self,
        meeting_id: i64,
        user_ids: &[i64],
    ) -> DatastoreResult<HashMap<i64, RawMeetingUser>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(user_ids
            .iter()
            .filter_map(|uid| {
                state
                    .meeting_users
                    .get(&(meeting_id, *uid))
                    .map(|mu| (*uid, mu.clone()))
            })
            .collect())
    }

    async fn fetch_user_details(
        &self,
        meeting_id: i64,
        user_ids: &[i64],
    ) -> DatastoreResult<HashMap<i64, UserDetails>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let present = state.presence.get(&meeting_id).cloned().unwrap_or_default();
        Ok(user_ids
            .iter()
            .map(|uid| {
                let default_vote_weight = state
                    .users
                    .get(uid)
                    .and_then(|u| u.default_vote_weight.clone());
                (
                    *uid,
                    UserDetails {
                        default_vote_weight,
                        present: present.contains(uid),
                    },
                )
            })
            .collect())
    }

    async fn reset(&self) -> DatastoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = State::default();
        Ok(())
    }
}
