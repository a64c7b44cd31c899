use crate::error::StorageError;
use crate::meeting::{ActiveJoinAttempt, ActiveJoinAttempts, Meeting};
use crate::storage::store::Store;
use serde_json::Value;
use std::sync::Arc;

pub const SCHEDULED_MEETINGS_KEY: &str = "scheduledMeetings";
pub const ACTIVE_JOIN_ATTEMPTS_KEY: &str = "activeJoinAttempts";

/// The two collections the scheduler owns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerState {
    pub meetings: Vec<Meeting>,
    pub attempts: ActiveJoinAttempts,
}

impl SchedulerState {
    pub fn meeting_by_start_mut(&mut self, start_time: i64) -> Option<&mut Meeting> {
        self.meetings.iter_mut().find(|m| m.start_time == start_time)
    }
}

/// Durable home of [`SchedulerState`]. Nothing is cached; callers reload before acting.
pub struct StateStore {
    store: Arc<dyn Store>,
}

impl StateStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Reads both collections. Entries that no longer deserialize are dropped and
    /// the cleaned list is written back.
    pub async fn load(&self) -> Result<SchedulerState, StorageError> {
        let mut values = self
            .store
            .get(&[SCHEDULED_MEETINGS_KEY, ACTIVE_JOIN_ATTEMPTS_KEY])
            .await?;

        let (meetings, dropped_meetings) =
            decode_meetings(values.remove(SCHEDULED_MEETINGS_KEY));
        let (attempts, dropped_attempts) =
            decode_attempts(values.remove(ACTIVE_JOIN_ATTEMPTS_KEY));

        let state = SchedulerState { meetings, attempts };
        if dropped_meetings + dropped_attempts > 0 {
            log::warn!(
                "Discarded {} malformed meetings and {} malformed join attempts from storage",
                dropped_meetings,
                dropped_attempts
            );
            self.persist(&state).await?;
        }
        Ok(state)
    }

    /// Writes both collections in a single batch.
    pub async fn persist(&self, state: &SchedulerState) -> Result<(), StorageError> {
        self.store
            .set(vec![
                (
                    SCHEDULED_MEETINGS_KEY.to_string(),
                    serde_json::to_value(&state.meetings)?,
                ),
                (
                    ACTIVE_JOIN_ATTEMPTS_KEY.to_string(),
                    serde_json::to_value(&state.attempts)?,
                ),
            ])
            .await?;
        Ok(())
    }

    /// Makes sure the attempts key exists without touching stored meetings.
    pub async fn ensure_attempts_key(&self) -> Result<(), StorageError> {
        let values = self.store.get(&[ACTIVE_JOIN_ATTEMPTS_KEY]).await?;
        if !values.contains_key(ACTIVE_JOIN_ATTEMPTS_KEY) {
            self.store
                .set(vec![(
                    ACTIVE_JOIN_ATTEMPTS_KEY.to_string(),
                    serde_json::to_value(ActiveJoinAttempts::new())?,
                )])
                .await?;
        }
        Ok(())
    }
}

fn decode_meetings(value: Option<Value>) -> (Vec<Meeting>, usize) {
    let items = match value {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => return (Vec::new(), 0),
        Some(_) => return (Vec::new(), 1),
    };
    let total = items.len();
    let meetings: Vec<Meeting> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    let dropped = total - meetings.len();
    (meetings, dropped)
}

fn decode_attempts(value: Option<Value>) -> (ActiveJoinAttempts, usize) {
    let items = match value {
        Some(Value::Object(items)) => items,
        None | Some(Value::Null) => return (ActiveJoinAttempts::new(), 0),
        Some(_) => return (ActiveJoinAttempts::new(), 1),
    };
    let total = items.len();
    let attempts: ActiveJoinAttempts = items
        .into_iter()
        .filter_map(|(id, item)| {
            serde_json::from_value::<ActiveJoinAttempt>(item)
                .ok()
                .map(|a| (id, a))
        })
        .collect();
    let dropped = total - attempts.len();
    (attempts, dropped)
}
