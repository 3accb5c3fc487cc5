//! Vote Service facade (C6): composes the poll config loader, validator,
//! eligibility resolver, ballot stores, and voted index into the public
//! `Start/Stop/Clear/ClearAll/Vote/Voted/VoteCount` contract.

use crate::datastore::Datastore;
use crate::domain::{BallotPayload, BallotValue, Poll, PollBackend, PollKind, PollState};
use crate::eligibility;
use crate::error::ServiceError;
use crate::poll_loader::PollConfigLoader;
use crate::store::{BallotStore, PollResult, StoreError};
use crate::validator;
use crate::voted_index::VotedIndex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn map_store_err(err: StoreError) -> ServiceError {
    match err {
        StoreError::DoesNotExist => ServiceError::NotExists,
        StoreError::Stopped => ServiceError::Stopped,
        StoreError::DoubleVote => ServiceError::DoubleVote,
        StoreError::Internal(msg) => ServiceError::Internal(msg),
    }
}

pub struct VoteService {
    loader: PollConfigLoader,
    fast_store: Arc<dyn BallotStore>,
    long_store: Arc<dyn BallotStore>,
    voted_index: Arc<VotedIndex>,
    datastore: Arc<dyn Datastore>,
}

impl VoteService {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        fast_store: Arc<dyn BallotStore>,
        long_store: Arc<dyn BallotStore>,
        voted_index: Arc<VotedIndex>,
    ) -> Self {
        Self {
            loader: PollConfigLoader::new(datastore.clone()),
            fast_store,
            long_store,
            voted_index,
            datastore,
        }
    }

    pub fn voted_index(&self) -> Arc<VotedIndex> {
        self.voted_index.clone()
    }

    fn backend_for(&self, poll: &Poll) -> &Arc<dyn BallotStore> {
        match poll.backend {
            PollBackend::Fast => &self.fast_store,
            PollBackend::Long => &self.long_store,
        }
    }

    /// Seed the voted index from both backends. Call once at startup.
    pub async fn prime_voted_index(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        self.voted_index
            .reload(cancel, self.fast_store.as_ref(), self.long_store.as_ref())
            .await
            .map_err(map_store_err)
    }

    pub async fn start(&self, cancel: &CancellationToken, poll_id: i64) -> Result<(), ServiceError> {
        let poll = self.loader.load(poll_id).await?;
        if poll.kind == PollKind::Analog {
            return Err(ServiceError::Invalid("analog polls cannot be started".into()));
        }
        if matches!(poll.state, PollState::Finished | PollState::Published) {
            return Err(ServiceError::Invalid(
                "poll is already finished or published".into(),
            ));
        }
        self.loader.preload(&poll).await?;
        self.backend_for(&poll)
            .start(cancel, poll_id)
            .await
            .map_err(map_store_err)
    }

    pub async fn stop(
        &self,
        cancel: &CancellationToken,
        poll_id: i64,
    ) -> Result<PollResult, ServiceError> {
        let poll = self.loader.load(poll_id).await?;
        self.backend_for(&poll)
            .stop(cancel, poll_id)
            .await
            .map_err(map_store_err)
    }

    /// Clears both backends, since a poll may have been migrated between
    /// them across its lifetime, and resets the voted index slot.
    pub async fn clear(&self, cancel: &CancellationToken, poll_id: i64) -> Result<(), ServiceError> {
        self.fast_store
            .clear(cancel, poll_id)
            .await
            .map_err(map_store_err)?;
        self.long_store
            .clear(cancel, poll_id)
            .await
            .map_err(map_store_err)?;
        self.voted_index.clear_poll(poll_id);
        Ok(())
    }

    pub async fn clear_all(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        self.datastore
            .reset()
            .await
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        self.fast_store.clear_all(cancel).await.map_err(map_store_err)?;
        self.long_store.clear_all(cancel).await.map_err(map_store_err)?;
        self.voted_index.clear_all();
        Ok(())
    }

    pub async fn vote(
        &self,
        cancel: &CancellationToken,
        poll_id: i64,
        request_user_id: i64,
        body_user_id: Option<i64>,
        raw_value: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        // `cached_poll` is the cache `preload` already warmed by `start`; a
        // poll this process has never loaded (e.g. after a restart) falls
        // back to one real read, same as `start`/`stop` always do.
        let poll = match self.loader.cached_poll(poll_id).await {
            Some(poll) => poll,
            None => self.loader.load(poll_id).await?,
        };
        if poll.state != PollState::Started {
            return Err(ServiceError::Stopped);
        }
        self.loader.ensure_preloaded(&poll).await?;

        let resolution = eligibility::resolve(&self.loader, &poll, request_user_id, body_user_id).await?;

        let value = BallotValue::decode(raw_value)
            .map_err(|_| ServiceError::Invalid("ballot value does not match any known shape".into()))?;
        validator::validate(&poll, &value)?;

        let named = poll.kind == PollKind::Named;
        let payload = BallotPayload {
            request_user_id: named.then_some(request_user_id),
            vote_user_id: named.then_some(resolution.vote_user_id),
            value: raw_value.clone(),
            weight: resolution.weight,
        };
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| ServiceError::Internal(format!("ballot encoding failed: {e}")))?;

        self.backend_for(&poll)
            .vote(cancel, poll_id, resolution.vote_user_id, bytes)
            .await
            .map_err(map_store_err)?;

        self.voted_index.record_vote(poll_id, resolution.vote_user_id);
        Ok(())
    }

    /// Entirely in-process: no backend or datastore calls. Delegation-from
    /// eligibility for each poll is drawn from whatever the poll config
    /// loader has already cached for that poll's meeting; a poll never
    /// `load`ed or preloaded on this process contributes only `requestUser`
    /// to its own eligible set.
    pub async fn voted(
        &self,
        poll_ids: &[i64],
        request_user_id: i64,
    ) -> HashMap<i64, Vec<i64>> {
        let mut per_poll = HashMap::new();
        for &poll_id in poll_ids {
            let mut eligible: HashSet<i64> = HashSet::from([request_user_id]);
            if let Some(poll) = self.loader.cached_poll(poll_id).await {
                eligible.extend(
                    self.loader
                        .delegators_of(poll.meeting_id, request_user_id)
                        .await,
                );
            }
            let result = self.voted_index.voted(&[poll_id], &eligible);
            per_poll.extend(result);
        }
        per_poll
    }

    pub fn vote_count(&self) -> HashMap<i64, usize> {
        self.voted_index.vote_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::memory::InMemoryDatastore;
    use crate::datastore::{RawMeeting, RawMeetingUser, RawPoll, RawUser};
    use crate::store::memory::MemoryStore;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn sample_poll(id: i64, meeting_id: i64) -> RawPoll {
        RawPoll {
            id,
            meeting_id,
            backend: "fast".into(),
            kind: "named".into(),
            state: "created".into(),
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

    fn service(ds: Arc<InMemoryDatastore>) -> VoteService {
        VoteService::new(
            ds,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(VotedIndex::new()),
        )
    }

    #[tokio::test]
    async fn start_then_vote_then_stop_round_trip() {
        let ds = Arc::new(InMemoryDatastore::new());
        ds.insert_poll(RawPoll {
            state: "started".into(),
            ..sample_poll(1, 10)
        });
        ds.insert_meeting(10, RawMeeting::default());
        ds.insert_meeting_user(
            10,
            5,
            RawMeetingUser {
                group_ids: vec![1],
                vote_weight: None,
                vote_delegated_to_id: None,
            },
        );
        ds.insert_user(5, RawUser::default());
        ds.set_present(10, 5);

        let svc = service(ds.clone());
        let c = token();
        svc.start(&c, 1).await.unwrap();

        svc.vote(&c, 1, 5, None, &serde_json::json!("Y")).await.unwrap();

        let err = svc
            .vote(&c, 1, 5, None, &serde_json::json!("Y"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DoubleVote));

        let result = svc.stop(&c, 1).await.unwrap();
        assert_eq!(result.voters, vec![5]);

        let counts = svc.vote_count();
        assert_eq!(counts.get(&1), Some(&1));

        let voted = svc.voted(&[1], 5).await;
        assert_eq!(voted.get(&1), Some(&vec![5]));
    }

    #[tokio::test]
    async fn start_rejects_analog_polls() {
        let ds = Arc::new(InMemoryDatastore::new());
        ds.insert_poll(RawPoll {
            kind: "analog".into(),
            ..sample_poll(1, 10)
        });
        let svc = service(ds);
        let c = token();
        let err = svc.start(&c, 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid(_)));
    }

    #[tokio::test]
    async fn clear_resets_both_backends_and_voted_index() {
        let ds = Arc::new(InMemoryDatastore::new());
        ds.insert_poll(RawPoll {
            state: "started".into(),
            ..sample_poll(1, 10)
        });
        ds.insert_meeting(10, RawMeeting::default());
        ds.insert_meeting_user(
            10,
            5,
            RawMeetingUser {
                group_ids: vec![1],
                vote_weight: None,
                vote_delegated_to_id: None,
            },
        );
        ds.set_present(10, 5);

        let svc = service(ds);
        let c = token();
        svc.start(&c, 1).await.unwrap();
        svc.vote(&c, 1, 5, None, &serde_json::json!("Y")).await.unwrap();
        svc.clear(&c, 1).await.unwrap();

        assert!(svc.vote_count().get(&1).is_none());
        svc.start(&c, 1).await.unwrap();
        svc.vote(&c, 1, 5, None, &serde_json::json!("Y")).await.unwrap();
    }
}
