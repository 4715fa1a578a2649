//! Process-wide directory of active bindings.
//!
//! Every binder registers itself here while its connection is alive, keyed by
//! connection id plus contract type. The directory is what makes the query
//! and fan-out surface possible: "all remote `C` proxies", "remote `C`
//! proxies on connections that also serve this exact object".

use crate::error::{Result, RpcError};
use crate::invoker::RemoteContract;
use crate::service::RpcService;
use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Local,
    Remote,
}

struct Entry {
    connection_id: u64,
    contract: TypeId,
    role: Role,
    /// `Arc<S>` for local entries, `Arc<RemoteBinder<C>>` for remote ones.
    payload: Arc<dyn Any + Send + Sync>,
}

/// Registry of live bindings, shared across connections.
///
/// Cheap to clone; all clones observe the same entries.
#[derive(Clone, Default)]
pub struct Directory {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_local<S: RpcService>(
        &self,
        connection_id: u64,
        service: Arc<S>,
    ) -> Result<()> {
        self.insert(connection_id, TypeId::of::<S>(), Role::Local, service, S::NAME)
    }

    pub(crate) fn register_remote<C: RemoteContract>(
        &self,
        connection_id: u64,
        binder: Arc<dyn Any + Send + Sync>,
    ) -> Result<()> {
        self.insert(connection_id, TypeId::of::<C>(), Role::Remote, binder, C::NAME)
    }

    fn insert(
        &self,
        connection_id: u64,
        contract: TypeId,
        role: Role,
        payload: Arc<dyn Any + Send + Sync>,
        name: &str,
    ) -> Result<()> {
        let mut entries = self.entries.lock().expect("directory lock poisoned");
        let duplicate = entries.iter().any(|e| {
            e.connection_id == connection_id && e.contract == contract && e.role == role
        });
        if duplicate {
            return Err(RpcError::config(format!(
                "contract {name} is already bound on connection {connection_id}"
            )));
        }
        debug!(connection = connection_id, contract = name, "registering binding");
        entries.push(Entry {
            connection_id,
            contract,
            role,
            payload,
        });
        Ok(())
    }

    /// Drop every binding of a connection. Called when it closes.
    pub(crate) fn deregister_connection(&self, connection_id: u64) {
        self.entries
            .lock()
            .expect("directory lock poisoned")
            .retain(|e| e.connection_id != connection_id);
    }

    /// All remote binders for contract `C`, across every connection.
    pub fn remotes<C: RemoteContract>(&self) -> Vec<Arc<crate::binder::RemoteBinder<C>>> {
        self.entries
            .lock()
            .expect("directory lock poisoned")
            .iter()
            .filter(|e| e.role == Role::Remote && e.contract == TypeId::of::<C>())
            .filter_map(|e| {
                Arc::clone(&e.payload)
                    .downcast::<crate::binder::RemoteBinder<C>>()
                    .ok()
            })
            .collect()
    }

    /// Remote binders for contract `C` restricted to connections that also
    /// serve this exact object locally. Identity is pointer identity, not
    /// value equality.
    pub fn remotes_for<C: RemoteContract, S: RpcService>(
        &self,
        service: &Arc<S>,
    ) -> Vec<Arc<crate::binder::RemoteBinder<C>>> {
        let entries = self.entries.lock().expect("directory lock poisoned");
        let serving: Vec<u64> = entries
            .iter()
            .filter(|e| e.role == Role::Local && e.contract == TypeId::of::<S>())
            .filter(|e| {
                Arc::clone(&e.payload)
                    .downcast::<S>()
                    .map(|obj| Arc::ptr_eq(&obj, service))
                    .unwrap_or(false)
            })
            .map(|e| e.connection_id)
            .collect();

        entries
            .iter()
            .filter(|e| {
                e.role == Role::Remote
                    && e.contract == TypeId::of::<C>()
                    && serving.contains(&e.connection_id)
            })
            .filter_map(|e| {
                Arc::clone(&e.payload)
                    .downcast::<crate::binder::RemoteBinder<C>>()
                    .ok()
            })
            .collect()
    }

    /// Number of distinct connections with at least one binding.
    pub fn connection_count(&self) -> usize {
        let entries = self.entries.lock().expect("directory lock poisoned");
        let mut ids: Vec<u64> = entries.iter().map(|e| e.connection_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}
