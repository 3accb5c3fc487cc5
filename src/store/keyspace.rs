//! Key-space ("fast") ballot store backend.
//!
//! Three logical keys per poll: `vote_state_<id>` (1=open, 2=closed),
//! `vote_data_<id>` (hash voter_id -> payload), and `vote_polls` (registry
//! set of known poll ids). The decisive check-and-insert runs as one Lua
//! script so two concurrent `Vote` calls can never race between the state
//! check and the insert (pipelines are not atomic enough for that).

use super::{BallotStore, PollResult, StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const STATE_OPEN: i64 = 1;
const STATE_CLOSED: i64 = 2;

fn state_key(poll_id: i64) -> String {
    format!("vote_state_{poll_id}")
}

fn data_key(poll_id: i64) -> String {
    format!("vote_data_{poll_id}")
}

const POLLS_KEY: &str = "vote_polls";

/// `0` success, `1` DoesNotExist, `2` Stopped, `3` DoubleVote.
static VOTE_SCRIPT: &str = r#"
local state = redis.call('GET', KEYS[1])
if not state then
    return 1
end
if tonumber(state) == 2 then
    return 2
end
local created = redis.call('HSETNX', KEYS[2], ARGV[1], ARGV[2])
if created == 0 then
    return 3
end
return 0
"#;

/// Key-space-backed [`BallotStore`] implementation ("fast" backend).
pub struct KeyspaceStore {
    conn: ConnectionManager,
    vote_script: Script,
}

impl KeyspaceStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            vote_script: Script::new(VOTE_SCRIPT),
        }
    }

    fn internal_err(err: redis::RedisError) -> StoreError {
        StoreError::Internal(err.to_string())
    }
}

#[async_trait]
impl BallotStore for KeyspaceStore {
    async fn start(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        // NX: only set to open if entirely absent. A closed poll is sticky;
        // an already-open poll is a no-op either way.
        let _: () = conn
            .set_nx(state_key(poll_id), STATE_OPEN)
            .await
            .map_err(Self::internal_err)?;
        let _: () = conn
            .sadd(POLLS_KEY, poll_id)
            .await
            .map_err(Self::internal_err)?;
        Ok(())
    }

    async fn vote(
        &self,
        _cancel: &CancellationToken,
        poll_id: i64,
        voter_id: i64,
        payload: Vec<u8>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .vote_script
            .key(state_key(poll_id))
            .key(data_key(poll_id))
            .arg(voter_id)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::internal_err)?;
        match code {
            0 => Ok(()),
            1 => Err(StoreError::DoesNotExist),
            2 => Err(StoreError::Stopped),
            3 => Err(StoreError::DoubleVote),
            other => Err(StoreError::Internal(format!(
                "unexpected vote script return code {other}"
            ))),
        }
    }

    async fn stop(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<PollResult> {
        let mut conn = self.conn.clone();
        // SET ... XX: only succeeds if the key already exists, distinguishing
        // "absent" from "open" the same way the script's GET does for vote.
        let set: Option<String> = conn
            .set_options(
                state_key(poll_id),
                STATE_CLOSED,
                redis::SetOptions::default().conditional_set(redis::ExistenceCheck::XX),
            )
            .await
            .map_err(Self::internal_err)?;
        if set.is_none() {
            return Err(StoreError::DoesNotExist);
        }
        fetch_poll_result(&mut conn, poll_id).await
    }

    async fn clear(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(state_key(poll_id))
            .await
            .map_err(Self::internal_err)?;
        let _: () = conn
            .del(data_key(poll_id))
            .await
            .map_err(Self::internal_err)?;
        let _: () = conn
            .srem(POLLS_KEY, poll_id)
            .await
            .map_err(Self::internal_err)?;
        Ok(())
    }

    async fn clear_all(&self, _cancel: &CancellationToken) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let poll_ids: Vec<i64> = conn.smembers(POLLS_KEY).await.map_err(Self::internal_err)?;
        for poll_id in &poll_ids {
            let _: () = conn
                .del(state_key(*poll_id))
                .await
                .map_err(Self::internal_err)?;
            let _: () = conn
                .del(data_key(*poll_id))
                .await
                .map_err(Self::internal_err)?;
        }
        let _: () = conn.del(POLLS_KEY).await.map_err(Self::internal_err)?;
        Ok(())
    }

    async fn voted(&self, _cancel: &CancellationToken) -> StoreResult<BTreeMap<i64, Vec<i64>>> {
        let mut conn = self.conn.clone();
        let poll_ids: Vec<i64> = conn.smembers(POLLS_KEY).await.map_err(Self::internal_err)?;
        let mut out = BTreeMap::new();
        for poll_id in poll_ids {
            let voter_ids: Vec<i64> = conn
                .hkeys(data_key(poll_id))
                .await
                .map_err(Self::internal_err)?;
            let mut voter_ids = voter_ids;
            voter_ids.sort_unstable();
            out.insert(poll_id, voter_ids);
        }
        Ok(out)
    }
}

async fn fetch_poll_result(
    conn: &mut ConnectionManager,
    poll_id: i64,
) -> StoreResult<PollResult> {
    let fields: Vec<(i64, Vec<u8>)> = conn
        .hgetall(data_key(poll_id))
        .await
        .map_err(|e| StoreError::Internal(e.to_string()))?;
    let mut voters: Vec<i64> = fields.iter().map(|(id, _)| *id).collect();
    voters.sort_unstable();
    let ballots = fields.into_iter().map(|(_, payload)| payload).collect();
    Ok(PollResult { ballots, voters })
}
