//! Fake collaborators for deterministic testing
//!
//! [`FakeSpawner`] answers scripted behaviors per command line and records
//! every spawn, completion and kill. [`FakeHost`] returns fixed host
//! metrics. Neither touches the real system.

use crate::diagnostics::{HostIntrospection, MemorySnapshot};
use crate::executor::{display_argv, ChildProcess, ProcessOutput, ProcessSpawner};
use async_trait::async_trait;
use kiosk_common::LoadAverage;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How a scripted command behaves once spawned
#[derive(Debug, Clone, PartialEq)]
pub enum FakeBehavior {
    /// Exit 0 with this stdout
    Output(String),
    /// Exit with a non-zero code and stderr
    Exit { code: i32, stderr: String },
    /// Terminated by a signal
    Signal,
    /// Never exits until killed
    Hang,
    /// Exit 0 with this stdout after a delay
    Delayed { delay: Duration, stdout: String },
    /// Spawning itself fails
    SpawnError(io::ErrorKind),
}

impl FakeBehavior {
    pub fn output(stdout: &str) -> Self {
        FakeBehavior::Output(stdout.to_string())
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        FakeBehavior::Exit {
            code,
            stderr: stderr.to_string(),
        }
    }

    pub fn delayed(delay: Duration, stdout: &str) -> Self {
        FakeBehavior::Delayed {
            delay,
            stdout: stdout.to_string(),
        }
    }
}

#[derive(Debug)]
struct FakeState {
    responses: HashMap<String, FakeBehavior>,
    fallback: FakeBehavior,
    spawned: Vec<String>,
    events: Vec<String>,
    kills: HashMap<String, usize>,
}

/// Scripted process spawner
///
/// Command lines are keyed as `program arg1 arg2`. Unscripted commands
/// behave like a missing binary.
#[derive(Debug, Clone)]
pub struct FakeSpawner {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                responses: HashMap::new(),
                fallback: FakeBehavior::SpawnError(io::ErrorKind::NotFound),
                spawned: Vec::new(),
                events: Vec::new(),
                kills: HashMap::new(),
            })),
        }
    }

    pub fn with_response(self, command_line: &str, behavior: FakeBehavior) -> Self {
        self.set_response(command_line, behavior);
        self
    }

    /// Change a scripted behavior, e.g. between two calls of a test
    pub fn set_response(&self, command_line: &str, behavior: FakeBehavior) {
        self.lock()
            .responses
            .insert(command_line.to_string(), behavior);
    }

    /// Every spawn attempt, in order
    pub fn spawned(&self) -> Vec<String> {
        self.lock().spawned.clone()
    }

    pub fn spawn_count(&self, command_line: &str) -> usize {
        self.lock()
            .spawned
            .iter()
            .filter(|c| c.as_str() == command_line)
            .count()
    }

    /// `start:`, `end:` and `kill:` events in the order they happened
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub fn kill_count(&self, command_line: &str) -> usize {
        self.lock().kills.get(command_line).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, command: &str, args: &[String]) -> io::Result<Box<dyn ChildProcess>> {
        let key = display_argv(command, args);
        let behavior = {
            let mut state = self.lock();
            state.spawned.push(key.clone());
            let behavior = state
                .responses
                .get(&key)
                .cloned()
                .unwrap_or_else(|| state.fallback.clone());
            if let FakeBehavior::SpawnError(kind) = behavior {
                return Err(io::Error::from(kind));
            }
            state.events.push(format!("start:{}", key));
            behavior
        };

        Ok(Box::new(FakeChild {
            key,
            behavior,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeChild {
    key: String,
    behavior: FakeBehavior,
    state: Arc<Mutex<FakeState>>,
}

impl FakeChild {
    fn record(&self, event: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.events.push(format!("{}:{}", event, self.key));
    }
}

#[async_trait]
impl ChildProcess for FakeChild {
    async fn wait_with_output(&mut self) -> io::Result<ProcessOutput> {
        let output = match self.behavior.clone() {
            FakeBehavior::Output(stdout) => ProcessOutput {
                code: Some(0),
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
            },
            FakeBehavior::Delayed { delay, stdout } => {
                tokio::time::sleep(delay).await;
                ProcessOutput {
                    code: Some(0),
                    stdout: stdout.into_bytes(),
                    stderr: Vec::new(),
                }
            }
            FakeBehavior::Exit { code, stderr } => ProcessOutput {
                code: Some(code),
                stdout: Vec::new(),
                stderr: stderr.into_bytes(),
            },
            FakeBehavior::Signal => ProcessOutput {
                code: None,
                stdout: Vec::new(),
                stderr: Vec::new(),
            },
            FakeBehavior::Hang => std::future::pending::<ProcessOutput>().await,
            FakeBehavior::SpawnError(kind) => return Err(io::Error::from(kind)),
        };
        self.record("end");
        Ok(output)
    }

    async fn kill(&mut self) -> io::Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            *state.kills.entry(self.key.clone()).or_insert(0) += 1;
        }
        self.record("kill");
        Ok(())
    }
}

/// Host with fixed metrics
#[derive(Debug, Clone, PartialEq)]
pub struct FakeHost {
    pub uptime: u64,
    pub load_average: LoadAverage,
    pub total_memory: u64,
    pub free_memory: u64,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            uptime: 3600,
            load_average: LoadAverage {
                one: 0.5,
                five: 0.4,
                fifteen: 0.3,
            },
            total_memory: 8 * 1024 * 1024 * 1024,
            free_memory: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl FakeHost {
    pub fn with_memory(total_memory: u64, free_memory: u64) -> Self {
        Self {
            total_memory,
            free_memory,
            ..Self::default()
        }
    }
}

impl HostIntrospection for FakeHost {
    fn uptime(&self) -> u64 {
        self.uptime
    }

    fn load_average(&self) -> LoadAverage {
        self.load_average
    }

    fn memory(&self) -> MemorySnapshot {
        MemorySnapshot {
            total: self.total_memory,
            free: self.free_memory,
        }
    }
}
