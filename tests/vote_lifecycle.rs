//! Integration tests for the end-to-end vote lifecycle: Start, Vote, Stop,
//! double-vote rejection, delegation, and the zero-new-reads preload
//! contract, exercised through the public `VoteService` facade against the
//! in-memory fixtures.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vote_service::datastore::memory::InMemoryDatastore;
use vote_service::datastore::{RawMeeting, RawMeetingUser, RawPoll, RawUser};
use vote_service::error::ServiceError;
use vote_service::service::VoteService;
use vote_service::store::memory::MemoryStore;
use vote_service::voted_index::VotedIndex;

fn token() -> CancellationToken {
    CancellationToken::new()
}

fn base_poll(id: i64, meeting_id: i64, state: &str) -> RawPoll {
    RawPoll {
        id,
        meeting_id,
        backend: "fast".into(),
        kind: "named".into(),
        state: state.into(),
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
async fn simple_vote_then_stop() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(7, 1, "started"));
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
    ds.set_present(1, 5);

    let svc = service(ds);
    let c = token();
    svc.start(&c, 7).await.unwrap();

    svc.vote(&c, 7, 5, None, &serde_json::json!("Y")).await.unwrap();

    let result = svc.stop(&c, 7).await.unwrap();
    assert_eq!(result.voters, vec![5]);
    assert_eq!(result.ballots.len(), 1);
    let payload: serde_json::Value = serde_json::from_slice(&result.ballots[0]).unwrap();
    assert_eq!(payload["value"], serde_json::json!("Y"));
    assert_eq!(payload["weight"], serde_json::json!("1.000000"));
}

#[tokio::test]
async fn double_vote_is_rejected_and_stop_still_shows_one_ballot() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(7, 1, "started"));
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
    ds.set_present(1, 5);

    let svc = service(ds);
    let c = token();
    svc.start(&c, 7).await.unwrap();
    svc.vote(&c, 7, 5, None, &serde_json::json!("Y")).await.unwrap();

    let err = svc
        .vote(&c, 7, 5, None, &serde_json::json!("Y"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DoubleVote));

    let result = svc.stop(&c, 7).await.unwrap();
    assert_eq!(result.ballots.len(), 1);
}

#[tokio::test]
async fn vote_after_stop_is_rejected() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(7, 1, "started"));
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
    ds.set_present(1, 5);

    let svc = service(ds);
    let c = token();
    svc.start(&c, 7).await.unwrap();
    svc.stop(&c, 7).await.unwrap();

    let err = svc
        .vote(&c, 7, 5, None, &serde_json::json!("Y"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Stopped));
}

#[tokio::test]
async fn delegation_allows_proxy_vote_and_records_the_delegator() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(9, 2, "started"));
    ds.insert_meeting(
        2,
        RawMeeting {
            vote_weight_enabled: false,
            users_forbid_delegator_to_vote: false,
            users_enable_vote_delegations: true,
        },
    );
    ds.insert_meeting_user(
        2,
        2,
        RawMeetingUser {
            group_ids: vec![1],
            vote_weight: None,
            vote_delegated_to_id: Some(1),
        },
    );
    ds.set_present(2, 1);

    let svc = service(ds);
    let c = token();
    svc.start(&c, 9).await.unwrap();
    svc.vote(&c, 9, 1, Some(2), &serde_json::json!("Y")).await.unwrap();

    let result = svc.stop(&c, 9).await.unwrap();
    assert_eq!(result.voters, vec![2]);
}

#[tokio::test]
async fn delegation_without_link_is_not_allowed() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(9, 2, "started"));
    ds.insert_meeting(
        2,
        RawMeeting {
            vote_weight_enabled: false,
            users_forbid_delegator_to_vote: false,
            users_enable_vote_delegations: true,
        },
    );
    ds.insert_meeting_user(
        2,
        2,
        RawMeetingUser {
            group_ids: vec![1],
            vote_weight: None,
            vote_delegated_to_id: None,
        },
    );
    ds.set_present(2, 1);

    let svc = service(ds);
    let c = token();
    svc.start(&c, 9).await.unwrap();
    let err = svc
        .vote(&c, 9, 1, Some(2), &serde_json::json!("Y"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotAllowed(_)));
}

#[tokio::test]
async fn vote_after_start_issues_zero_further_datastore_reads() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(7, 1, "started"));
    ds.insert_meeting(1, RawMeeting::default());
    for voter in 1..=5 {
        ds.insert_meeting_user(
            1,
            voter,
            RawMeetingUser {
                group_ids: vec![1],
                vote_weight: None,
                vote_delegated_to_id: None,
            },
        );
        ds.set_present(1, voter);
    }
    ds.insert_user(1, RawUser::default());

    let svc = service(ds.clone());
    let c = token();
    svc.start(&c, 7).await.unwrap();
    let reads_after_start = ds.call_count();

    // `start` already cached both the poll record and the meeting's
    // preloaded working set; every vote below answers entirely from those
    // caches, touching neither `fetch_polls` nor any of the meeting/group/
    // user round trips.
    for voter in 1..=5 {
        svc.vote(&c, 7, voter, None, &serde_json::json!("Y")).await.unwrap();
    }

    assert_eq!(ds.call_count(), reads_after_start);
}

#[tokio::test]
async fn voted_and_vote_count_reflect_recorded_ballots() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(7, 1, "started"));
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
    ds.set_present(1, 5);

    let svc = service(ds);
    let c = token();
    svc.start(&c, 7).await.unwrap();
    svc.vote(&c, 7, 5, None, &serde_json::json!("Y")).await.unwrap();

    let voted = svc.voted(&[7], 5).await;
    assert_eq!(voted.get(&7), Some(&vec![5]));

    let counts = svc.vote_count();
    assert_eq!(counts.get(&7), Some(&1));
}

#[tokio::test]
async fn clear_then_start_allows_revoting() {
    let ds = Arc::new(InMemoryDatastore::new());
    ds.insert_poll(base_poll(7, 1, "started"));
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
    ds.set_present(1, 5);

    let svc = service(ds);
    let c = token();
    svc.start(&c, 7).await.unwrap();
    svc.vote(&c, 7, 5, None, &serde_json::json!("Y")).await.unwrap();
    svc.clear(&c, 7).await.unwrap();
    svc.start(&c, 7).await.unwrap();
    svc.vote(&c, 7, 5, None, &serde_json::json!("Y")).await.unwrap();
}
