//! In-process sink with fault injection, for exercising load and refresh
//! semantics without a database.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::db::{Connector, Sink, SinkResult};

#[derive(Debug, Default)]
pub struct Faults {
    pub connect: bool,
    pub begin: bool,
    pub copy: bool,
    pub commit: bool,
    pub rollback: bool,
    /// Any executed statement containing one of these fragments fails.
    pub statements: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryState {
    /// Committed COPY rows, one tab-split line per row.
    pub rows: Vec<Vec<String>>,
    /// Every statement the sinks saw, transaction control included.
    pub log: Vec<String>,
    pub opened: usize,
    pub closed: usize,
    pub faults: Faults,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store lock poisoned")
    }

    pub fn sink(&self) -> MemorySink {
        MemorySink {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }
    }

    pub fn statements_matching(&self, fragment: &str) -> usize {
        self.state()
            .log
            .iter()
            .filter(|s| s.contains(fragment))
            .count()
    }
}

pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    pending: Vec<Vec<String>>,
}

fn injected(what: &str) -> sqlx::Error {
    sqlx::Error::Protocol(format!("injected {what} failure"))
}

impl MemorySink {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory store lock poisoned")
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn begin(&mut self) -> SinkResult<()> {
        let mut state = self.state();
        state.log.push("BEGIN".to_string());
        if state.faults.begin {
            return Err(injected("begin"));
        }
        Ok(())
    }

    async fn copy_in(
        &mut self,
        statement: &str,
        chunks: &mut (dyn Iterator<Item = Vec<u8>> + Send),
    ) -> SinkResult<u64> {
        let fail = {
            let mut state = self.state();
            state.log.push(statement.to_string());
            state.faults.copy
        };

        let mut copied = 0u64;
        for chunk in chunks {
            let text = String::from_utf8(chunk).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
            for line in text.lines() {
                self.pending
                    .push(line.split('\t').map(str::to_string).collect());
                copied += 1;
            }
            if fail {
                return Err(injected("copy"));
            }
        }
        Ok(copied)
    }

    async fn execute(&mut self, statement: &str) -> SinkResult<()> {
        let mut state = self.state();
        state.log.push(statement.to_string());
        if state
            .faults
            .statements
            .iter()
            .any(|fragment| statement.contains(fragment.as_str()))
        {
            return Err(injected("statement"));
        }
        Ok(())
    }

    async fn commit(&mut self) -> SinkResult<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut state = self.state.lock().expect("memory store lock poisoned");
        state.log.push("COMMIT".to_string());
        if state.faults.commit {
            self.pending = pending;
            return Err(injected("commit"));
        }
        state.rows.extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> SinkResult<()> {
        self.pending.clear();
        let mut state = self.state();
        state.log.push("ROLLBACK".to_string());
        if state.faults.rollback {
            return Err(injected("rollback"));
        }
        Ok(())
    }

    async fn close(self) -> SinkResult<()> {
        self.state().closed += 1;
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryStore {
    type Sink = MemorySink;

    async fn connect(&self) -> SinkResult<MemorySink> {
        {
            let mut state = self.state();
            if state.faults.connect {
                return Err(injected("connect"));
            }
            state.opened += 1;
        }
        Ok(self.sink())
    }
}
