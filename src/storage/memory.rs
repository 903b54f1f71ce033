// src/storage/memory.rs
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{ChainStore, StorageError};
use crate::ledger::ChainSnapshot;
use crate::registry::RegistryExport;

#[derive(Default)]
struct MemoryState {
    chain: Option<ChainSnapshot>,
    nodes: Option<RegistryExport>,
    chain_saves: usize,
    node_saves: usize,
}

/// In-process store. Clones share state; `set_failing(true)` makes every call error.
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    state: Arc<Mutex<MemoryState>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_chain(self, snapshot: ChainSnapshot) -> Self {
        self.state.lock().chain = Some(snapshot);
        self
    }

    pub fn with_nodes(self, nodes: RegistryExport) -> Self {
        self.state.lock().nodes = Some(nodes);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn chain(&self) -> Option<ChainSnapshot> {
        self.state.lock().chain.clone()
    }

    pub fn nodes(&self) -> Option<RegistryExport> {
        self.state.lock().nodes.clone()
    }

    pub fn chain_saves(&self) -> usize {
        self.state.lock().chain_saves
    }

    pub fn node_saves(&self) -> usize {
        self.state.lock().node_saves
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Backend(format!("{} store unavailable", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save_blockchain(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
        self.check()?;
        let mut state = self.state.lock();
        state.chain = Some(snapshot.clone());
        state.chain_saves += 1;
        Ok(())
    }

    async fn load_blockchain(&self) -> Result<Option<ChainSnapshot>, StorageError> {
        self.check()?;
        Ok(self.state.lock().chain.clone())
    }

    async fn save_nodes(&self, nodes: &RegistryExport) -> Result<(), StorageError> {
        self.check()?;
        let mut state = self.state.lock();
        state.nodes = Some(nodes.clone());
        state.node_saves += 1;
        Ok(())
    }

    async fn load_nodes(&self) -> Result<Option<RegistryExport>, StorageError> {
        self.check()?;
        Ok(self.state.lock().nodes.clone())
    }
}
