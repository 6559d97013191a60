//! Ledger Store over Postgres.
//!
//! One `sqlx::Transaction` per transition at the server default
//! (read committed). Rows a transition will update are read `for update`, so
//! concurrent transitions on the same contestant serialize on the row lock.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use mmr_ledger::{
    ComponentState, ComponentStateUpdate, Flag, LedgerStore, LedgerTxn, ResultKey, ResultRow,
    ResultUpdate, Standing, StoreError, SubmissionHistoryRow,
};

use crate::{backend_error, insert_error};

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    type Txn = PgTxn;

    async fn begin(&self) -> Result<PgTxn, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| backend_error(e, "begin"))?;
        Ok(PgTxn { tx })
    }
}

pub struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTxn for PgTxn {
    async fn find_round_id(
        &mut self,
        challenge_id: i64,
        round_type_id: i32,
    ) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            r#"
            select round_id
            from rounds
            where challenge_id = $1 and round_type_id = $2
            order by round_id
            limit 1
            "#,
        )
        .bind(challenge_id)
        .bind(round_type_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "find_round_id"))?;

        row.map(|r| r.try_get::<i64, _>("round_id"))
            .transpose()
            .map_err(|e| backend_error(e, "find_round_id decode"))
    }

    async fn component_id(&mut self, round_id: i64) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(
            r#"
            select component_id
            from round_components
            where round_id = $1
            order by component_id
            limit 1
            "#,
        )
        .bind(round_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "component_id"))?;

        row.map(|r| r.try_get::<i64, _>("component_id"))
            .transpose()
            .map_err(|e| backend_error(e, "component_id decode"))
    }

    async fn rated_ind(&mut self, round_id: i64) -> Result<Option<i32>, StoreError> {
        let row = sqlx::query("select rated_ind from rounds where round_id = $1")
            .bind(round_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| backend_error(e, "rated_ind"))?;

        row.map(|r| r.try_get::<i32, _>("rated_ind"))
            .transpose()
            .map_err(|e| backend_error(e, "rated_ind decode"))
    }

    async fn component_state(
        &mut self,
        round_id: i64,
        coder_id: i64,
    ) -> Result<Option<ComponentState>, StoreError> {
        let row = sqlx::query(&format!(
            "{COMPONENT_STATE_SELECT} where s.round_id = $1 and s.coder_id = $2 for update of s"
        ))
        .bind(round_id)
        .bind(coder_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "component_state"))?;

        row.as_ref().map(component_state_from_row).transpose()
    }

    async fn component_state_by_id(
        &mut self,
        long_component_state_id: i64,
    ) -> Result<Option<ComponentState>, StoreError> {
        let row = sqlx::query(&format!(
            "{COMPONENT_STATE_SELECT} where s.long_component_state_id = $1 for update of s"
        ))
        .bind(long_component_state_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "component_state_by_id"))?;

        row.as_ref().map(component_state_from_row).transpose()
    }

    async fn insert_component_state(&mut self, row: &ComponentState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into long_component_state (
              long_component_state_id, round_id, challenge_id, coder_id, component_id,
              status_id, submission_number, example_submission_number, points
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9
            )
            "#,
        )
        .bind(row.long_component_state_id)
        .bind(row.round_id)
        .bind(row.challenge_id)
        .bind(row.coder_id)
        .bind(row.component_id)
        .bind(row.status_id)
        .bind(row.submission_number)
        .bind(row.example_submission_number)
        .bind(row.points)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            insert_error(
                e,
                "long_component_state",
                COMPONENT_STATE_DUPLICATE_KEYS,
                format!("round_id={} coder_id={}", row.round_id, row.coder_id),
            )
        })?;
        Ok(())
    }

    async fn update_component_state(
        &mut self,
        long_component_state_id: i64,
        update: &ComponentStateUpdate,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            update long_component_state
               set points            = coalesce($2, points),
                   submission_number = coalesce($3, submission_number)
             where long_component_state_id = $1
            "#,
        )
        .bind(long_component_state_id)
        .bind(update.points)
        .bind(update.submission_number)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "update_component_state"))?;

        Ok(res.rows_affected())
    }

    async fn result_row(&mut self, key: &ResultKey) -> Result<Option<ResultRow>, StoreError> {
        let row = sqlx::query(
            r#"
            select coder_id, round_id, challenge_id, attended, placed, rated_ind, advanced,
                   system_point_total, point_total, old_rating, old_vol
            from long_comp_result
            where coder_id = $1 and round_id = $2 and challenge_id = $3
            for update
            "#,
        )
        .bind(key.coder_id)
        .bind(key.round_id)
        .bind(key.challenge_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "result_row"))?;

        row.as_ref().map(result_from_row).transpose()
    }

    async fn insert_result(&mut self, row: &ResultRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into long_comp_result (
              coder_id, round_id, challenge_id, attended, placed, rated_ind, advanced,
              system_point_total, point_total, old_rating, old_vol
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11
            )
            "#,
        )
        .bind(row.coder_id)
        .bind(row.round_id)
        .bind(row.challenge_id)
        .bind(row.attended.as_str())
        .bind(row.placed)
        .bind(row.rated_ind)
        .bind(row.advanced.as_str())
        .bind(row.system_point_total)
        .bind(row.point_total)
        .bind(row.old_rating)
        .bind(row.old_vol)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            insert_error(
                e,
                "long_comp_result",
                RESULT_DUPLICATE_KEYS,
                format!(
                    "coder_id={} round_id={} challenge_id={}",
                    row.coder_id, row.round_id, row.challenge_id
                ),
            )
        })?;
        Ok(())
    }

    async fn update_result(
        &mut self,
        key: &ResultKey,
        update: &ResultUpdate,
    ) -> Result<u64, StoreError> {
        let res = sqlx::query(
            r#"
            update long_comp_result
               set system_point_total = coalesce($4, system_point_total),
                   point_total        = coalesce($5, point_total),
                   attended           = coalesce($6::text, attended),
                   placed             = coalesce($7, placed),
                   old_rating         = coalesce($8, old_rating),
                   old_vol            = coalesce($9, old_vol)
             where coder_id = $1 and round_id = $2 and challenge_id = $3
            "#,
        )
        .bind(key.coder_id)
        .bind(key.round_id)
        .bind(key.challenge_id)
        .bind(update.system_point_total)
        .bind(update.point_total)
        .bind(update.attended.map(|f| f.as_str()))
        .bind(update.placed)
        .bind(update.old_rating)
        .bind(update.old_vol)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "update_result"))?;

        Ok(res.rows_affected())
    }

    async fn standings(&mut self, round_id: i64) -> Result<Vec<Standing>, StoreError> {
        let rows = sqlx::query(
            r#"
            select coder_id, attended, system_point_total, placed
            from long_comp_result
            where round_id = $1
            order by coder_id
            for update
            "#,
        )
        .bind(round_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "standings"))?;

        rows.iter()
            .map(|r| -> Result<Standing, StoreError> {
                Ok(Standing {
                    coder_id: get(r, "coder_id")?,
                    attended: flag(r, "attended")?,
                    system_point_total: get(r, "system_point_total")?,
                    placed: get(r, "placed")?,
                })
            })
            .collect()
    }

    async fn insert_submission_history(
        &mut self,
        row: &SubmissionHistoryRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into long_submission (
              long_component_state_id, round_id, submission_number, example,
              open_time, submit_time, submission_points, language_id
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8
            )
            "#,
        )
        .bind(row.long_component_state_id)
        .bind(row.round_id)
        .bind(row.submission_number)
        .bind(row.example)
        .bind(row.open_time)
        .bind(row.submit_time)
        .bind(row.submission_points)
        .bind(row.language_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            insert_error(
                e,
                "long_submission",
                SUBMISSION_DUPLICATE_KEYS,
                format!(
                    "long_component_state_id={} submission_number={} example={}",
                    row.long_component_state_id, row.submission_number, row.example
                ),
            )
        })?;
        Ok(())
    }

    async fn initial_score(
        &mut self,
        legacy_submission_id: i64,
    ) -> Result<Option<f64>, StoreError> {
        let row = sqlx::query(
            "select initial_score from submissions where legacy_submission_id = $1",
        )
        .bind(legacy_submission_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| backend_error(e, "initial_score"))?;

        match row {
            None => Ok(None),
            Some(r) => {
                let score: Option<f64> = get(&r, "initial_score")?;
                Ok(Some(score.unwrap_or(0.0)))
            }
        }
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| backend_error(e, "commit"))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| backend_error(e, "rollback"))
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

const COMPONENT_STATE_SELECT: &str = r#"
    select s.long_component_state_id, s.round_id, s.challenge_id, s.coder_id,
           s.component_id, s.status_id, s.submission_number,
           s.example_submission_number, s.points
    from long_component_state s
"#;

/// Unique constraints whose violation means "this row already exists".
/// A collision on any other key (a reused `long_component_state_id`, say)
/// is a store fault, not a replay.
const COMPONENT_STATE_DUPLICATE_KEYS: &[&str] = &["uq_long_component_state_round_coder"];
const RESULT_DUPLICATE_KEYS: &[&str] = &["long_comp_result_pkey"];
const SUBMISSION_DUPLICATE_KEYS: &[&str] = &["long_submission_pkey"];

fn get<'r, T>(row: &'r PgRow, col: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(col)
        .map_err(|e| StoreError::backend(format!("decode {col}: {e}")))
}

fn flag(row: &PgRow, col: &str) -> Result<Flag, StoreError> {
    let raw: String = get(row, col)?;
    Flag::parse(&raw).ok_or_else(|| StoreError::backend(format!("bad {col} flag {raw:?}")))
}

fn component_state_from_row(r: &PgRow) -> Result<ComponentState, StoreError> {
    Ok(ComponentState {
        long_component_state_id: get(r, "long_component_state_id")?,
        round_id: get(r, "round_id")?,
        challenge_id: get(r, "challenge_id")?,
        coder_id: get(r, "coder_id")?,
        component_id: get(r, "component_id")?,
        status_id: get(r, "status_id")?,
        submission_number: get(r, "submission_number")?,
        example_submission_number: get(r, "example_submission_number")?,
        points: get(r, "points")?,
    })
}

fn result_from_row(r: &PgRow) -> Result<ResultRow, StoreError> {
    Ok(ResultRow {
        coder_id: get(r, "coder_id")?,
        round_id: get(r, "round_id")?,
        challenge_id: get(r, "challenge_id")?,
        attended: flag(r, "attended")?,
        placed: get(r, "placed")?,
        rated_ind: get(r, "rated_ind")?,
        advanced: flag(r, "advanced")?,
        system_point_total: get(r, "system_point_total")?,
        point_total: get(r, "point_total")?,
        old_rating: get(r, "old_rating")?,
        old_vol: get(r, "old_vol")?,
    })
}
