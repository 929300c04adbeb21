use super::{BackendError, IsolationBackend, ManagedUnit, UnitState, WorkerSpec};
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

struct LocalUnit {
    spec: WorkerSpec,
    state: UnitState,
    pid: Option<u32>,
    log_path: Option<PathBuf>,
}

/// Runs workers as local OS processes. `create` only records the spec; the
/// process is spawned on `start` and torn down with SIGTERM, a bounded wait,
/// then SIGKILL.
pub struct LocalProcessBackend {
    units: Arc<Mutex<HashMap<String, LocalUnit>>>,
    next_id: Arc<Mutex<u64>>,
}

impl LocalProcessBackend {
    pub fn new() -> Self {
        Self {
            units: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    fn alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    fn with_unit<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut LocalUnit) -> T,
    ) -> Result<T, BackendError> {
        let mut units = self.units.lock().unwrap();
        units
            .get_mut(id)
            .map(f)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }
}

impl Default for LocalProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IsolationBackend for LocalProcessBackend {
    async fn create(&self, spec: &WorkerSpec) -> Result<String, BackendError> {
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("local-{:04}", *next)
        };
        info!("Backend: created unit '{}' ({})", spec.name, id);
        self.units.lock().unwrap().insert(
            id.clone(),
            LocalUnit {
                spec: spec.clone(),
                state: UnitState::Created,
                pid: None,
                log_path: None,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), BackendError> {
        let spec = self.with_unit(id, |unit| unit.spec.clone())?;
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| BackendError::Api(format!("unit {} has an empty command", id)))?;

        // Both streams go to one file per unit so `logs` can serve them.
        let log_path = std::env::temp_dir().join(format!("{}.log", id));
        let log_file = File::create(&log_path)
            .map_err(|e| BackendError::Api(format!("failed to open log file: {}", e)))?;
        let log_clone = log_file
            .try_clone()
            .map_err(|e| BackendError::Api(format!("failed to clone log handle: {}", e)))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.envs(&spec.env);
        cmd.stdout(Stdio::from(log_file));
        cmd.stderr(Stdio::from(log_clone));

        let child = cmd
            .spawn()
            .map_err(|e| BackendError::Api(format!("failed to spawn '{}': {}", spec.name, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| BackendError::Api(format!("'{}' exited before start returned", spec.name)))?;
        info!("Backend: started '{}' (PID {})", spec.name, pid);

        self.with_unit(id, |unit| {
            unit.state = UnitState::Running;
            unit.pid = Some(pid);
            unit.log_path = Some(log_path);
        })
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), BackendError> {
        let pid = self.with_unit(id, |unit| unit.pid)?;
        if let Some(pid) = pid {
            if Self::alive(pid) {
                info!("Backend: sending SIGTERM to PID {}", pid);
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
                let deadline = tokio::time::Instant::now() + timeout;
                while Self::alive(pid) && tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                if Self::alive(pid) {
                    warn!("Backend: PID {} ignored SIGTERM, killing", pid);
                    unsafe {
                        libc::kill(pid as i32, libc::SIGKILL);
                    }
                }
            }
        }
        self.with_unit(id, |unit| {
            unit.state = UnitState::Exited;
            unit.pid = None;
        })
    }

    async fn remove(&self, id: &str) -> Result<(), BackendError> {
        let mut units = self.units.lock().unwrap();
        match units.remove(id) {
            Some(unit) => {
                if let Some(pid) = unit.pid {
                    if Self::alive(pid) {
                        warn!("Backend: removing live unit '{}', killing PID {}", unit.spec.name, pid);
                        unsafe {
                            libc::kill(pid as i32, libc::SIGKILL);
                        }
                    }
                }
                Ok(())
            }
            None => Err(BackendError::NotFound(id.to_string())),
        }
    }

    async fn inspect(&self, id: &str) -> Result<UnitState, BackendError> {
        self.with_unit(id, |unit| {
            match unit.pid {
                Some(pid) if Self::alive(pid) => UnitState::Running,
                // The process died out from under us.
                Some(_) => {
                    unit.state = UnitState::Exited;
                    unit.pid = None;
                    UnitState::Exited
                }
                None => unit.state,
            }
        })
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String, BackendError> {
        let path = self.with_unit(id, |unit| unit.log_path.clone())?;
        let Some(path) = path else {
            // Never started, nothing captured yet.
            return Ok(String::new());
        };
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BackendError::Api(format!("failed to read log file: {}", e)))?;
        let lines: Vec<&str> = contents.lines().collect();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].join("\n"))
    }

    async fn list(
        &self,
        label_key: &str,
        label_value: Option<&str>,
    ) -> Result<Vec<ManagedUnit>, BackendError> {
        let units = self.units.lock().unwrap();
        Ok(units
            .iter()
            .filter(|(_, unit)| {
                match (unit.spec.labels.get(label_key), label_value) {
                    (Some(actual), Some(wanted)) => actual == wanted,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
            })
            .map(|(id, unit)| ManagedUnit {
                id: id.clone(),
                name: unit.spec.name.clone(),
                state: unit.state,
                labels: unit.spec.labels.clone(),
            })
            .collect())
    }
}
