use super::{BackendError, IsolationBackend, ManagedUnit, UnitState, WorkerSpec};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MemoryState {
    units: HashMap<String, ManagedUnit>,
    logs: HashMap<String, Vec<String>>,
    next_id: u64,
    /// Scripted errors, consumed one per backend call.
    fail_queue: VecDeque<BackendError>,
}

/// In-memory backend for tests. Units move through `Created` / `Running` /
/// `Exited` without any real process behind them.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next backend call.
    pub fn fail_next(&self, error: BackendError) {
        self.state.lock().unwrap().fail_queue.push_back(error);
    }

    /// Drop a unit without going through `remove`, simulating out-of-band
    /// disappearance.
    pub fn forget(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.units.remove(id);
        state.logs.remove(id);
    }

    /// Append a line to a unit's captured output.
    pub fn append_log(&self, id: &str, line: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .entry(id.to_string())
            .or_default()
            .push(line.to_string());
    }

    pub fn unit_state(&self, id: &str) -> Option<UnitState> {
        self.state
            .lock()
            .unwrap()
            .units
            .get(id)
            .map(|unit| unit.state)
    }

    fn take_scripted_failure(&self) -> Option<BackendError> {
        self.state.lock().unwrap().fail_queue.pop_front()
    }
}

#[async_trait]
impl IsolationBackend for MemoryBackend {
    async fn create(&self, spec: &WorkerSpec) -> Result<String, BackendError> {
        if let Some(error) = self.take_scripted_failure() {
            return Err(error);
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("unit-{:04}", state.next_id);
        state.units.insert(
            id.clone(),
            ManagedUnit {
                id: id.clone(),
                name: spec.name.clone(),
                state: UnitState::Created,
                labels: spec.labels.clone(),
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), BackendError> {
        if let Some(error) = self.take_scripted_failure() {
            return Err(error);
        }
        let mut state = self.state.lock().unwrap();
        match state.units.get_mut(id) {
            Some(unit) => {
                unit.state = UnitState::Running;
                Ok(())
            }
            None => Err(BackendError::NotFound(id.to_string())),
        }
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), BackendError> {
        if let Some(error) = self.take_scripted_failure() {
            return Err(error);
        }
        let mut state = self.state.lock().unwrap();
        match state.units.get_mut(id) {
            Some(unit) => {
                unit.state = UnitState::Exited;
                Ok(())
            }
            None => Err(BackendError::NotFound(id.to_string())),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        if let Some(error) = self.take_scripted_failure() {
            return Err(error);
        }
        let mut state = self.state.lock().unwrap();
        match state.units.remove(id) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(id.to_string())),
        }
    }

    async fn inspect(&self, id: &str) -> Result<UnitState, BackendError> {
        if let Some(error) = self.take_scripted_failure() {
            return Err(error);
        }
        let state = self.state.lock().unwrap();
        state
            .units
            .get(id)
            .map(|unit| unit.state)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, BackendError> {
        if let Some(error) = self.take_scripted_failure() {
            return Err(error);
        }
        let state = self.state.lock().unwrap();
        if !state.units.contains_key(id) {
            return Err(BackendError::NotFound(id.to_string()));
        }
        let lines = state.logs.get(id).cloned().unwrap_or_default();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }

    async fn list(
        &self,
        label_key: &str,
        label_value: Option<&str>,
    ) -> Result<Vec<ManagedUnit>, BackendError> {
        if let Some(error) = self.take_scripted_failure() {
            return Err(error);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .units
            .values()
            .filter(|unit| match (unit.labels.get(label_key), label_value) {
                (Some(actual), Some(wanted)) => actual == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect())
    }
}
