//! Relational ("long") ballot store backend.
//!
//! Two tables: `poll(id, stopped, user_ids)` and `objects(id, poll_id, vote)`.
//! `user_ids` packs voters as a little-endian sequence of ascending 32-bit
//! ids; storing them sorted rather than appended means row order in
//! `objects` carries no information about registration order.
//!
//! `vote` runs as a `REPEATABLE READ` transaction and retries transparently
//! on a serialization failure (SQLSTATE `40001`), bounded by the caller's
//! cancellation token, via a retry helper over a transactional closure.

use super::{BallotStore, PollResult, StoreError, StoreResult};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;

const SERIALIZATION_FAILURE: &str = "40001";

/// Relational [`BallotStore`] implementation ("long" backend) over PostgreSQL.
pub struct RelationalStore {
    pool: PgPool,
}

impl RelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the `poll`/`objects` schema if absent. Called once at startup;
    /// `clear_all` also uses this to implement its drop-and-recreate reset.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll (
                id BIGINT PRIMARY KEY,
                stopped BOOLEAN NOT NULL DEFAULT FALSE,
                user_ids BYTEA NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                id BIGSERIAL PRIMARY KEY,
                poll_id BIGINT NOT NULL REFERENCES poll(id) ON DELETE CASCADE,
                vote BYTEA NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(internal_err)?;

        Ok(())
    }

    async fn drop_schema(&self) -> StoreResult<()> {
        sqlx::query("DROP TABLE IF EXISTS objects")
            .execute(&self.pool)
            .await
            .map_err(internal_err)?;
        sqlx::query("DROP TABLE IF EXISTS poll")
            .execute(&self.pool)
            .await
            .map_err(internal_err)?;
        Ok(())
    }
}

fn internal_err(err: sqlx::Error) -> StoreError {
    StoreError::Internal(err.to_string())
}

fn is_serialization_failure(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(SERIALIZATION_FAILURE))
}

/// Runs `op` inside a `REPEATABLE READ` transaction, retrying the whole
/// closure on a serialization conflict until it succeeds or `cancel` fires.
async fn with_retrying_transaction<T, F, Fut>(
    pool: &PgPool,
    cancel: &CancellationToken,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut(Transaction<'_, Postgres>) -> Fut,
    Fut: Future<Output = Result<(T, Transaction<'_, Postgres>), StoreError>>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(StoreError::Internal("operation cancelled".into()));
        }

        let mut tx = pool.begin().await.map_err(internal_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(internal_err)?;

        match op(tx).await {
            Ok((value, tx)) => {
                tx.commit().await.map_err(internal_err)?;
                return Ok(value);
            }
            Err(StoreError::Internal(msg)) => {
                // A bare sqlx serialization error surfaces as Internal; detect
                // it by message is unreliable, so callers that hit 40001
                // return a dedicated sentinel instead (see `vote` below).
                if msg == RETRY_SENTINEL {
                    continue;
                }
                return Err(StoreError::Internal(msg));
            }
            Err(other) => return Err(other),
        }
    }
}

const RETRY_SENTINEL: &str = "__serialization_conflict__";

fn pack_user_ids(ids: &[i32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    buf
}

fn unpack_user_ids(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

#[async_trait]
impl BallotStore for RelationalStore {
    async fn start(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO poll (id, stopped, user_ids)
            VALUES ($1, FALSE, '')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(poll_id)
        .execute(&self.pool)
        .await
        .map_err(internal_err)?;
        Ok(())
    }

    async fn vote(
        &self,
        cancel: &CancellationToken,
        poll_id: i64,
        voter_id: i64,
        payload: Vec<u8>,
    ) -> StoreResult<()> {
        let voter_id_32: i32 = voter_id
            .try_into()
            .map_err(|_| StoreError::Internal("voter id out of range for relational backend".into()))?;

        with_retrying_transaction(&self.pool, cancel, |mut tx| {
            let payload = payload.clone();
            async move {
                let row: Option<(bool, Vec<u8>)> =
                    sqlx::query_as("SELECT stopped, user_ids FROM poll WHERE id = $1 FOR UPDATE")
                        .bind(poll_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(|e| classify(e))?;

                let Some((stopped, user_ids_bytes)) = row else {
                    return Err(StoreError::DoesNotExist);
                };
                if stopped {
                    return Err(StoreError::Stopped);
                }

                let mut ids = unpack_user_ids(&user_ids_bytes);
                if ids.binary_search(&voter_id_32).is_ok() {
                    return Err(StoreError::DoubleVote);
                }
                let insert_at = ids.partition_point(|&x| x < voter_id_32);
                ids.insert(insert_at, voter_id_32);

                sqlx::query("UPDATE poll SET user_ids = $1 WHERE id = $2")
                    .bind(pack_user_ids(&ids))
                    .bind(poll_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify(e))?;

                sqlx::query("INSERT INTO objects (poll_id, vote) VALUES ($1, $2)")
                    .bind(poll_id)
                    .bind(&payload)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| classify(e))?;

                Ok(((), tx))
            }
        })
        .await
    }

    async fn stop(&self, cancel: &CancellationToken, poll_id: i64) -> StoreResult<PollResult> {
        with_retrying_transaction(&self.pool, cancel, |mut tx| async move {
            let row: Option<(bool, Vec<u8>)> =
                sqlx::query_as("SELECT stopped, user_ids FROM poll WHERE id = $1 FOR UPDATE")
                    .bind(poll_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| classify(e))?;
            let Some((_stopped, user_ids_bytes)) = row else {
                return Err(StoreError::DoesNotExist);
            };

            sqlx::query("UPDATE poll SET stopped = TRUE WHERE id = $1")
                .bind(poll_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| classify(e))?;

            let ballots: Vec<(Vec<u8>,)> =
                sqlx::query_as("SELECT vote FROM objects WHERE poll_id = $1 ORDER BY id")
                    .bind(poll_id)
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(|e| classify(e))?;

            let voters: Vec<i64> = unpack_user_ids(&user_ids_bytes)
                .into_iter()
                .map(i64::from)
                .collect();
            let result = PollResult {
                ballots: ballots.into_iter().map(|(v,)| v).collect(),
                voters,
            };
            Ok((result, tx))
        })
        .await
    }

    async fn clear(&self, _cancel: &CancellationToken, poll_id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM poll WHERE id = $1")
            .bind(poll_id)
            .execute(&self.pool)
            .await
            .map_err(internal_err)?;
        Ok(())
    }

    async fn clear_all(&self, _cancel: &CancellationToken) -> StoreResult<()> {
        self.drop_schema().await?;
        self.ensure_schema().await?;
        Ok(())
    }

    async fn voted(&self, _cancel: &CancellationToken) -> StoreResult<BTreeMap<i64, Vec<i64>>> {
        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as("SELECT id, user_ids FROM poll")
            .fetch_all(&self.pool)
            .await
            .map_err(internal_err)?;
        Ok(rows
            .into_iter()
            .map(|(id, bytes)| {
                let voters = unpack_user_ids(&bytes).into_iter().map(i64::from).collect();
                (id, voters)
            })
            .collect())
    }
}

/// Maps a raw sqlx error to the retry sentinel when it is a serialization
/// conflict, otherwise to `Internal`.
fn classify(err: sqlx::Error) -> StoreError {
    if is_serialization_failure(&err) {
        StoreError::Internal(RETRY_SENTINEL.to_string())
    } else {
        internal_err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_and_stays_sorted() {
        let ids = vec![1, 5, 42, 1000];
        let bytes = pack_user_ids(&ids);
        assert_eq!(unpack_user_ids(&bytes), ids);
    }

    // The remaining invariants (anonymity of `objects` row order, the
    // REPEATABLE READ retry loop under real contention) require a live
    // PostgreSQL instance and are exercised in `tests/relational_store.rs`,
    // which is skipped when `DATABASE_URL` is unset.
}
