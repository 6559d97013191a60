//! In-memory Ledger Store.
//!
//! One transaction at a time: `begin` takes an owned lock on the committed
//! state and works on a private copy. `commit` publishes the copy; dropping
//! or rolling back discards it. Unique keys match the Postgres schema.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use mmr_ledger::{
    ComponentState, ComponentStateUpdate, LedgerStore, LedgerTxn, ResultKey, ResultRow,
    ResultUpdate, Standing, StoreError, SubmissionHistoryRow,
};

/// A round of some type owned by a challenge, with its single component.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRow {
    pub round_id: i64,
    pub challenge_id: i64,
    pub round_type_id: i32,
    pub rated_ind: i32,
    pub component_id: Option<i64>,
}

/// Full committed contents of a [`MemLedger`].
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub rounds: Vec<RoundRow>,
    pub component_states: BTreeMap<i64, ComponentState>,
    pub results: HashMap<ResultKey, ResultRow>,
    pub submissions: Vec<SubmissionHistoryRow>,
    /// legacy submission id -> recorded initial score (`None` = null column).
    pub initial_scores: HashMap<i64, Option<f64>>,
}

impl LedgerState {
    pub fn component_state(&self, round_id: i64, coder_id: i64) -> Option<&ComponentState> {
        self.component_states
            .values()
            .find(|c| c.round_id == round_id && c.coder_id == coder_id)
    }

    pub fn result(&self, round_id: i64, challenge_id: i64, coder_id: i64) -> Option<&ResultRow> {
        self.results.get(&ResultKey {
            round_id,
            challenge_id,
            coder_id,
        })
    }

    pub fn history_for(&self, long_component_state_id: i64) -> Vec<&SubmissionHistoryRow> {
        self.submissions
            .iter()
            .filter(|s| s.long_component_state_id == long_component_state_id)
            .collect()
    }
}

/// Store operation a test can make fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    InsertComponentState,
    InsertResult,
    UpdateResult,
    InsertSubmissionHistory,
    Commit,
}

#[derive(Clone, Default)]
pub struct MemLedger {
    state: Arc<Mutex<LedgerState>>,
    fail: Arc<StdMutex<Option<FailPoint>>>,
    committed_writes: Arc<AtomicU64>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LedgerState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            ..Self::default()
        }
    }

    /// Make the next call to `point` fail with a backend error.
    pub fn fail_once(&self, point: FailPoint) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    /// Rows inserted or updated by committed transactions so far.
    pub fn committed_writes(&self) -> u64 {
        self.committed_writes.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }

    pub async fn add_round(&self, round: RoundRow) {
        let mut st = self.state.lock().await;
        st.rounds.push(round);
        st.rounds.sort_by_key(|r| r.round_id);
    }

    pub async fn set_initial_score(&self, legacy_submission_id: i64, score: Option<f64>) {
        self.state
            .lock()
            .await
            .initial_scores
            .insert(legacy_submission_id, score);
    }

    fn check(fail: &StdMutex<Option<FailPoint>>, point: FailPoint) -> Result<(), StoreError> {
        let mut armed = fail.lock().unwrap_or_else(PoisonError::into_inner);
        if *armed == Some(point) {
            *armed = None;
            return Err(StoreError::backend(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemLedger {
    type Txn = MemTxn;

    async fn begin(&self) -> Result<MemTxn, StoreError> {
        Self::check(&self.fail, FailPoint::Begin)?;
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(MemTxn {
            guard,
            work,
            writes: 0,
            fail: self.fail.clone(),
            committed_writes: self.committed_writes.clone(),
        })
    }
}

pub struct MemTxn {
    guard: OwnedMutexGuard<LedgerState>,
    work: LedgerState,
    writes: u64,
    fail: Arc<StdMutex<Option<FailPoint>>>,
    committed_writes: Arc<AtomicU64>,
}

impl MemTxn {
    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        MemLedger::check(&self.fail, point)
    }
}

#[async_trait]
impl LedgerTxn for MemTxn {
    async fn find_round_id(
        &mut self,
        challenge_id: i64,
        round_type_id: i32,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .work
            .rounds
            .iter()
            .find(|r| r.challenge_id == challenge_id && r.round_type_id == round_type_id)
            .map(|r| r.round_id))
    }

    async fn component_id(&mut self, round_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self
            .work
            .rounds
            .iter()
            .find(|r| r.round_id == round_id)
            .and_then(|r| r.component_id))
    }

    async fn rated_ind(&mut self, round_id: i64) -> Result<Option<i32>, StoreError> {
        Ok(self
            .work
            .rounds
            .iter()
            .find(|r| r.round_id == round_id)
            .map(|r| r.rated_ind))
    }

    async fn component_state(
        &mut self,
        round_id: i64,
        coder_id: i64,
    ) -> Result<Option<ComponentState>, StoreError> {
        Ok(self.work.component_state(round_id, coder_id).cloned())
    }

    async fn component_state_by_id(
        &mut self,
        long_component_state_id: i64,
    ) -> Result<Option<ComponentState>, StoreError> {
        Ok(self
            .work
            .component_states
            .get(&long_component_state_id)
            .cloned())
    }

    async fn insert_component_state(&mut self, row: &ComponentState) -> Result<(), StoreError> {
        self.check(FailPoint::InsertComponentState)?;
        if self
            .work
            .component_states
            .contains_key(&row.long_component_state_id)
        {
            return Err(StoreError::Duplicate {
                entity: "long_component_state",
                key: format!("long_component_state_id={}", row.long_component_state_id),
            });
        }
        if self
            .work
            .component_state(row.round_id, row.coder_id)
            .is_some()
        {
            return Err(StoreError::Duplicate {
                entity: "long_component_state",
                key: format!("round_id={} coder_id={}", row.round_id, row.coder_id),
            });
        }
        self.work
            .component_states
            .insert(row.long_component_state_id, row.clone());
        self.writes += 1;
        Ok(())
    }

    async fn update_component_state(
        &mut self,
        long_component_state_id: i64,
        update: &ComponentStateUpdate,
    ) -> Result<u64, StoreError> {
        let Some(row) = self.work.component_states.get_mut(&long_component_state_id) else {
            return Ok(0);
        };
        if let Some(points) = update.points {
            row.points = Some(points);
        }
        if let Some(n) = update.submission_number {
            row.submission_number = n;
        }
        self.writes += 1;
        Ok(1)
    }

    async fn result_row(&mut self, key: &ResultKey) -> Result<Option<ResultRow>, StoreError> {
        Ok(self.work.results.get(key).cloned())
    }

    async fn insert_result(&mut self, row: &ResultRow) -> Result<(), StoreError> {
        self.check(FailPoint::InsertResult)?;
        let key = row.key();
        if self.work.results.contains_key(&key) {
            return Err(StoreError::Duplicate {
                entity: "long_comp_result",
                key: format!(
                    "coder_id={} round_id={} challenge_id={}",
                    key.coder_id, key.round_id, key.challenge_id
                ),
            });
        }
        self.work.results.insert(key, row.clone());
        self.writes += 1;
        Ok(())
    }

    async fn update_result(
        &mut self,
        key: &ResultKey,
        update: &ResultUpdate,
    ) -> Result<u64, StoreError> {
        self.check(FailPoint::UpdateResult)?;
        let Some(row) = self.work.results.get_mut(key) else {
            return Ok(0);
        };
        if let Some(v) = update.system_point_total {
            row.system_point_total = Some(v);
        }
        if let Some(v) = update.point_total {
            row.point_total = Some(v);
        }
        if let Some(v) = update.attended {
            row.attended = v;
        }
        if let Some(v) = update.placed {
            row.placed = v;
        }
        if let Some(v) = update.old_rating {
            row.old_rating = Some(v);
        }
        if let Some(v) = update.old_vol {
            row.old_vol = Some(v);
        }
        self.writes += 1;
        Ok(1)
    }

    async fn standings(&mut self, round_id: i64) -> Result<Vec<Standing>, StoreError> {
        let mut out: Vec<Standing> = self
            .work
            .results
            .values()
            .filter(|r| r.round_id == round_id)
            .map(|r| Standing {
                coder_id: r.coder_id,
                attended: r.attended,
                system_point_total: r.system_point_total,
                placed: r.placed,
            })
            .collect();
        out.sort_by_key(|s| s.coder_id);
        Ok(out)
    }

    async fn insert_submission_history(
        &mut self,
        row: &SubmissionHistoryRow,
    ) -> Result<(), StoreError> {
        self.check(FailPoint::InsertSubmissionHistory)?;
        let exists = self.work.submissions.iter().any(|s| {
            s.long_component_state_id == row.long_component_state_id
                && s.submission_number == row.submission_number
                && s.example == row.example
        });
        if exists {
            return Err(StoreError::Duplicate {
                entity: "long_submission",
                key: format!(
                    "long_component_state_id={} submission_number={} example={}",
                    row.long_component_state_id, row.submission_number, row.example
                ),
            });
        }
        self.work.submissions.push(row.clone());
        self.writes += 1;
        Ok(())
    }

    async fn initial_score(
        &mut self,
        legacy_submission_id: i64,
    ) -> Result<Option<f64>, StoreError> {
        Ok(self
            .work
            .initial_scores
            .get(&legacy_submission_id)
            .map(|s| s.unwrap_or(0.0)))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.check(FailPoint::Commit)?;
        let MemTxn {
            mut guard,
            work,
            writes,
            committed_writes,
            ..
        } = self;
        *guard = work;
        committed_writes.fetch_add(writes, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
