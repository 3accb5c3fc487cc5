//! Datastore: the external object store collaborator. The core only
//! depends on its interface, never a concrete client. [`memory`] provides
//! an in-memory fixture implementation standing in for the real store in
//! tests and standalone runs.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("datastore request failed: {0}")]
    Internal(String),
}

pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// Raw poll fields as read from the object store, before the config loader
/// parses string-typed enums into [`crate::domain`] types.
#[derive(Debug, Clone)]
pub struct RawPoll {
    pub id: i64,
    pub meeting_id: i64,
    pub backend: String,
    pub kind: String,
    pub state: String,
    pub pollmethod: String,
    pub entitled_group_ids: Vec<i64>,
    pub global_yes: bool,
    pub global_no: bool,
    pub global_abstain: bool,
    pub min_votes_amount: u64,
    pub max_votes_amount: u64,
    pub max_votes_per_option: u64,
    pub option_ids: Vec<i64>,
}

/// Meeting-wide voting settings.
#[derive(Debug, Clone, Default)]
pub struct RawMeeting {
    pub vote_weight_enabled: bool,
    pub users_forbid_delegator_to_vote: bool,
    pub users_enable_vote_delegations: bool,
}

/// The per-meeting record linking a user to their groups, weight, and
/// delegation target in that meeting.
#[derive(Debug, Clone, Default)]
pub struct RawMeetingUser {
    pub group_ids: Vec<i64>,
    pub vote_weight: Option<String>,
    pub vote_delegated_to_id: Option<i64>,
}

/// Global (cross-meeting) user fields.
#[derive(Debug, Clone, Default)]
pub struct RawUser {
    pub default_vote_weight: Option<String>,
}

/// Presence and default weight for one user, the two facts the preload's
/// final round trip needs about the union of voters and delegation targets.
#[derive(Debug, Clone, Default)]
pub struct UserDetails {
    pub default_vote_weight: Option<String>,
    pub present: bool,
}

/// Batched, declarative reads against the external object store. Each
/// method is one round trip regardless of how many ids are requested, so
/// the poll config loader's preload step can bound itself to a fixed
/// number of calls.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn fetch_polls(&self, ids: &[i64]) -> DatastoreResult<HashMap<i64, RawPoll>>;

    async fn fetch_meetings(&self, ids: &[i64]) -> DatastoreResult<HashMap<i64, RawMeeting>>;

    /// Union of meeting-user ids that belong to any of `group_ids` within `meeting_id`.
    async fn fetch_group_members(
        &self,
        meeting_id: i64,
        group_ids: &[i64],
    ) -> DatastoreResult<Vec<i64>>;

    async fn fetch_meeting_users(
        &self,
        meeting_id: i64,
        user_ids: &[i64],
    ) -> DatastoreResult<HashMap<i64, RawMeetingUser>>;

    /// Presence and default weight for the union of users and their
    /// delegation targets — the preload's fourth and final round trip.
    async fn fetch_user_details(
        &self,
        meeting_id: i64,
        user_ids: &[i64],
    ) -> DatastoreResult<HashMap<i64, UserDetails>>;

    /// Optional reset capability used by `ClearAll`; a datastore that
    /// doesn't support resets simply no-ops.
    async fn reset(&self) -> DatastoreResult<()> {
        Ok(())
    }
}
