//! Poll Config Loader (C2): translates a poll id into a typed [`Poll`] by
//! issuing batched reads against the [`Datastore`], and runs the preload
//! step that warms a per-meeting cache so a subsequent `Vote` does zero new
//! reads.

use crate::datastore::{Datastore, RawMeeting, RawMeetingUser, UserDetails};
use crate::domain::{Poll, PollBackend, PollKind, PollMethod, PollState};
use crate::error::ServiceError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a `Vote` on one meeting might need, warmed by [`PollConfigLoader::preload`].
#[derive(Default, Clone)]
struct PreloadedMeeting {
    meeting: RawMeeting,
    meeting_users: HashMap<i64, RawMeetingUser>,
    user_details: HashMap<i64, UserDetails>,
}

/// Translates poll ids into [`Poll`] configs and preloads the per-request
/// cache that [`crate::eligibility`] reads from.
pub struct PollConfigLoader {
    datastore: Arc<dyn Datastore>,
    cache: RwLock<HashMap<i64, PreloadedMeeting>>,
    polls: RwLock<HashMap<i64, Poll>>,
}

impl PollConfigLoader {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            cache: RwLock::new(HashMap::new()),
            polls: RwLock::new(HashMap::new()),
        }
    }

    /// Load and translate a poll's configuration. Missing poll -> `NotExists`;
    /// an unparseable enum field -> `Invalid`. Caches the translated poll so
    /// `cached_poll` can answer without a further read.
    pub async fn load(&self, poll_id: i64) -> Result<Poll, ServiceError> {
        let mut polls = self
            .datastore
            .fetch_polls(&[poll_id])
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let raw = polls.remove(&poll_id).ok_or(ServiceError::NotExists)?;
        let poll = translate(raw)?;
        self.polls.write().await.insert(poll_id, poll.clone());
        Ok(poll)
    }

    /// A previously `load`ed poll, if any, with no new datastore read.
    pub async fn cached_poll(&self, poll_id: i64) -> Option<Poll> {
        self.polls.read().await.get(&poll_id).cloned()
    }

    /// Users whose meeting-user record in `meeting_id` delegates to
    /// `request_user_id`, read from the preload cache only.
    pub async fn delegators_of(&self, meeting_id: i64, request_user_id: i64) -> HashSet<i64> {
        self.cache
            .read()
            .await
            .get(&meeting_id)
            .map(|m| {
                m.meeting_users
                    .iter()
                    .filter(|(_, mu)| mu.vote_delegated_to_id == Some(request_user_id))
                    .map(|(uid, _)| *uid)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Warm the per-meeting cache in exactly 4 round trips, regardless of
    /// group or member count.
    pub async fn preload(&self, poll: &Poll) -> Result<(), ServiceError> {
        let meeting_id = poll.meeting_id;

        // 1. Meeting vote-weight / delegation flags.
        let mut meetings = self
            .datastore
            .fetch_meetings(&[meeting_id])
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        let meeting = meetings.remove(&meeting_id).unwrap_or_default();

        // 2. For every entitled group, the list of meeting-users.
        let member_ids = self
            .datastore
            .fetch_group_members(meeting_id, &poll.entitled_group_ids)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        // 3. For each meeting-user: group membership, vote weight, delegation
        // target, meeting link.
        let meeting_users = self
            .datastore
            .fetch_meeting_users(meeting_id, &member_ids)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        // 4. For the union of users and their delegation targets: presence
        // and default weight.
        let mut union: HashSet<i64> = member_ids.into_iter().collect();
        union.extend(
            meeting_users
                .values()
                .filter_map(|mu| mu.vote_delegated_to_id),
        );
        let union: Vec<i64> = union.into_iter().collect();
        let user_details = self
            .datastore
            .fetch_user_details(meeting_id, &union)
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        self.cache.write().await.insert(
            meeting_id,
            PreloadedMeeting {
                meeting,
                meeting_users,
                user_details,
            },
        );
        Ok(())
    }

    /// Load a poll for voting purposes, reading exclusively from the preload
    /// cache for everything other than the poll record itself. If the
    /// meeting was never preloaded (e.g. Start never ran on this process),
    /// the cache is populated lazily so the call still succeeds, at the
    /// cost of the zero-new-reads guarantee for that one request.
    pub async fn meeting_settings(&self, meeting_id: i64) -> RawMeeting {
        self.cache
            .read()
            .await
            .get(&meeting_id)
            .map(|m| m.meeting.clone())
            .unwrap_or_default()
    }

    pub async fn meeting_user(&self, meeting_id: i64, user_id: i64) -> Option<RawMeetingUser> {
        self.cache
            .read()
            .await
            .get(&meeting_id)
            .and_then(|m| m.meeting_users.get(&user_id).cloned())
    }

    pub async fn user_details(&self, meeting_id: i64, user_id: i64) -> Option<UserDetails> {
        self.cache
            .read()
            .await
            .get(&meeting_id)
            .and_then(|m| m.user_details.get(&user_id).cloned())
    }

    /// Ensure the cache has an entry for `meeting_id`, preloading it from the
    /// datastore on first use. This is the escape hatch that keeps `Vote`
    /// correct even when `Start` hasn't warmed the cache yet.
    pub async fn ensure_preloaded(&self, poll: &Poll) -> Result<(), ServiceError> {
        if self.cache.read().await.contains_key(&poll.meeting_id) {
            return Ok(());
        }
        self.preload(poll).await
    }
}

fn translate(raw: crate::datastore::RawPoll) -> Result<Poll, ServiceError> {
    let backend = PollBackend::from_wire(&raw.backend);
    let kind = match raw.kind.as_str() {
        "named" => PollKind::Named,
        "pseudonymous" => PollKind::Pseudonymous,
        "analog" => PollKind::Analog,
        "crypt" => PollKind::Crypt,
        other => return Err(ServiceError::Invalid(format!("unknown poll kind '{other}'"))),
    };
    let state = match raw.state.as_str() {
        "created" => PollState::Created,
        "started" => PollState::Started,
        "finished" => PollState::Finished,
        "published" => PollState::Published,
        other => return Err(ServiceError::Invalid(format!("unknown poll state '{other}'"))),
    };
    let pollmethod = PollMethod::from_wire(&raw.pollmethod)
        .ok_or_else(|| ServiceError::Invalid(format!("unknown pollmethod '{}'", raw.pollmethod)))?;

    Ok(Poll {
        id: raw.id,
        meeting_id: raw.meeting_id,
        backend,
        kind,
        state,
        pollmethod,
        entitled_group_ids: raw.entitled_group_ids,
        global_yes: raw.global_yes,
        global_no: raw.global_no,
        global_abstain: raw.global_abstain,
        min_votes_amount: raw.min_votes_amount,
        max_votes_amount: raw.max_votes_amount,
        max_votes_per_option: raw.max_votes_per_option,
        option_ids: raw.option_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::memory::InMemoryDatastore;
    use crate::datastore::{RawMeeting, RawMeetingUser, RawPoll, RawUser};

    fn sample_poll(id: i64, meeting_id: i64) -> RawPoll {
        RawPoll {
            id,
            meeting_id,
            backend: "fast".into(),
            kind: "named".into(),
            state: "started".into(),
            pollmethod: "Y".into(),
            entitled_group_ids: vec![1],
            global_yes: true,
            global_no: false,
            global_abstain: false,
            min_votes_amount: 0,
            max_votes_amount: 0,
            max_votes_per_option: 0,
            option_ids: vec![],
        }
    }

    #[tokio::test]
    async fn load_missing_poll_is_not_exists() {
        let ds = Arc::new(InMemoryDatastore::new());
        let loader = PollConfigLoader::new(ds);
        let err = loader.load(7).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotExists));
    }

    #[tokio::test]
    async fn preload_uses_exactly_four_round_trips_and_vote_reads_zero_more() {
        let ds = Arc::new(InMemoryDatastore::new());
        ds.insert_poll(sample_poll(7, 1));
        ds.insert_meeting(1, RawMeeting::default());
        ds.insert_meeting_user(
            1,
            5,
            RawMeetingUser {
                group_ids: vec![1],
                vote_weight: None,
                vote_delegated_to_id: None,
            },
        );
        ds.insert_user(5, RawUser::default());
        ds.set_present(1, 5);

        let loader = PollConfigLoader::new(ds.clone());
        let poll = loader.load(7).await.unwrap();
        assert_eq!(ds.call_count(), 1);

        loader.preload(&poll).await.unwrap();
        assert_eq!(ds.call_count(), 1 + 4);

        // Subsequent reads for voting purposes hit only the cache.
        let _ = loader.meeting_settings(1).await;
        let _ = loader.meeting_user(1, 5).await;
        let _ = loader.user_details(1, 5).await;
        assert_eq!(ds.call_count(), 1 + 4);
    }
}
