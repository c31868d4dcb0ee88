//! # dropgraph-dlm - the data lifecycle manager
//!
//! Tracks every drop registered with it via a weak reference, sweeping on a
//! configurable interval to expire and evict drops whose `expirationDate`
//! has passed, and recording (without acting on) replication intent.
//!
//! The DLM never extends a drop's lifetime: it holds [`std::sync::Weak`]
//! handles, so a session that drops (pun intended) its last strong
//! reference to a drop makes that drop disappear from the DLM on the next
//! sweep, without error.

pub mod config;
pub mod error;
pub mod hooks;
pub mod record;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use dropgraph_core::{DropHandle, DropKind, DropNode, DropStatus, Oid, Uid};

pub use config::DlmConfig;
pub use error::{DlmError, Result};
pub use hooks::{DlmHooks, NoopHooks};
pub use record::DlmRecord;

struct Entry {
    handle: Weak<DropNode>,
    record: DlmRecord,
}

/// The data lifecycle manager. One instance is shared by every session on a
/// node manager; each session's drops are registered with it independently
/// of which session they belong to, since expiration is a drop-level, not
/// session-level, concern.
pub struct Dlm {
    config: DlmConfig,
    hooks: Arc<dyn DlmHooks>,
    entries: Mutex<HashMap<Uid, Entry>>,
}

impl Dlm {
    pub fn new(config: DlmConfig) -> Arc<Self> {
        Self::with_hooks(config, Arc::new(NoopHooks))
    }

    pub fn with_hooks(config: DlmConfig, hooks: Arc<dyn DlmHooks>) -> Arc<Self> {
        Arc::new(Self {
            config,
            hooks,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Register `drop` for lifecycle tracking. `expiration_date` of `None`
    /// means the drop never expires on its own.
    pub fn add_drop(&self, drop: &DropHandle, expiration_date: Option<chrono::DateTime<Utc>>, desired_replicas: u32) {
        let record = DlmRecord::new(drop.oid.clone(), drop.uid.clone(), expiration_date, desired_replicas);
        self.entries.lock().insert(
            drop.uid.clone(),
            Entry {
                handle: Arc::downgrade(drop),
                record,
            },
        );
        debug!(oid = %drop.oid, uid = %drop.uid, "drop registered with dlm");
    }

    pub fn record(&self, uid: &Uid) -> Option<DlmRecord> {
        self.entries.lock().get(uid).map(|e| e.record.clone())
    }

    pub fn record_replica(&self, uid: &Uid, uri: String) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(uid).ok_or_else(|| DlmError::NoRecord(uid.to_string()))?;
        entry.record.replica_uris.push(uri);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// One sweep pass: drop dead weak references, expire/evict drops past
    /// their expiration date, and kick off replication for under-replicated
    /// drops via the configured hook.
    pub fn sweep_once(&self) {
        let now = Utc::now();
        let mut to_evict: Vec<(Uid, DropHandle)> = Vec::new();
        let mut to_replicate: Vec<DlmRecord> = Vec::new();
        let mut dead: Vec<Uid> = Vec::new();

        {
            let entries = self.entries.lock();
            for (uid, entry) in entries.iter() {
                let Some(handle) = entry.handle.upgrade() else {
                    dead.push(uid.clone());
                    continue;
                };
                let is_completed = handle.as_data().map(|d| d.status() == DropStatus::Completed).unwrap_or(false);
                if is_completed && entry.record.is_expired(now) {
                    to_evict.push((uid.clone(), handle.clone()));
                }
                if entry.record.is_under_replicated() {
                    to_replicate.push(entry.record.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut entries = self.entries.lock();
            for uid in &dead {
                entries.remove(uid);
            }
        }

        for (uid, handle) in to_evict {
            self.expire_and_evict(&uid, &handle);
        }

        for record in to_replicate {
            if let Err(e) = self.hooks.replicate(&record) {
                warn!(oid = %record.oid, error = %e, "replication hook failed");
            }
        }
    }

    fn expire_and_evict(&self, uid: &Uid, handle: &DropHandle) {
        if let DropKind::Data(_) = handle.kind() {
            if let Some(data) = handle.as_data() {
                if let Err(e) = data.mark_expired(handle.oid.as_str()) {
                    warn!(oid = %handle.oid, error = %e, "failed to mark drop expired");
                    return;
                }
                handle.events.emit(&data.status_event(&handle.oid, &handle.uid, DropStatus::Expired));

                for child_oid in data.children() {
                    match self.find_by_oid(&child_oid) {
                        Some((child_uid, child_handle)) => {
                            debug!(parent = %handle.oid, child = %child_oid, "cascading expiry to container child");
                            self.expire_and_evict(&child_uid, &child_handle);
                        }
                        None => {
                            warn!(parent = %handle.oid, child = %child_oid, "container child not registered with dlm, cannot cascade expiry");
                        }
                    }
                }

                data.evict_payload(handle.oid.as_str());
                if let Err(e) = data.mark_deleted(handle.oid.as_str()) {
                    warn!(oid = %handle.oid, error = %e, "failed to evict expired drop");
                    return;
                }
                handle.events.emit(&data.status_event(&handle.oid, &handle.uid, DropStatus::Deleted));
                info!(oid = %handle.oid, uid = %uid, "drop expired and evicted");
            }
        }
    }

    /// Resolve a container child's `oid` back to its registered `(uid,
    /// handle)`, the lookup `expire_and_evict`'s cascade needs since
    /// `DataDrop::children()` only knows the child's `oid`, not its `Uid`.
    fn find_by_oid(&self, oid: &Oid) -> Option<(Uid, DropHandle)> {
        let entries = self.entries.lock();
        entries.values().find_map(|entry| {
            if &entry.record.oid != oid {
                return None;
            }
            entry.handle.upgrade().map(|h| (entry.record.uid.clone(), h))
        })
    }

    /// Spawn the background sweeper on the current Tokio runtime. Returns a
    /// handle the caller can abort on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let interval = this.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep_once();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropgraph_core::drop::DataDrop;
    use dropgraph_core::status::ExecutionMode;
    use dropgraph_core::Oid;

    fn memory_drop(oid: &str) -> DropHandle {
        DropNode::new_data(Oid::new(oid), Uid::generate(), DataDrop::new_memory(false, None), ExecutionMode::Drop)
    }

    #[test]
    fn dead_weak_references_are_pruned_on_sweep() {
        let dlm = Dlm::new(DlmConfig::default());
        {
            let d = memory_drop("A");
            dlm.add_drop(&d, None, 0);
            assert_eq!(dlm.len(), 1);
        }
        dlm.sweep_once();
        assert_eq!(dlm.len(), 0);
    }

    #[test]
    fn completed_drop_past_expiration_is_evicted() {
        let dlm = Dlm::new(DlmConfig::default());
        let d = memory_drop("A");
        d.as_data().unwrap().open("A").unwrap();
        d.as_data().unwrap().close("A").unwrap();
        let expiry = Utc::now() - chrono::Duration::seconds(1);
        dlm.add_drop(&d, Some(expiry), 0);

        dlm.sweep_once();

        assert_eq!(d.as_data().unwrap().status(), DropStatus::Deleted);
    }

    #[test]
    fn expired_container_cascades_eviction_to_its_children() {
        let dlm = Dlm::new(DlmConfig::default());

        let child = memory_drop("child");
        child.as_data().unwrap().open("child").unwrap();
        child.as_data().unwrap().write("child", b"payload").unwrap();
        child.as_data().unwrap().close("child").unwrap();
        dlm.add_drop(&child, None, 0);

        let container =
            DropNode::new_data(Oid::new("container"), Uid::generate(), DataDrop::new_container(), ExecutionMode::Drop);
        container.as_data().unwrap().add_child(Oid::new("child"));
        container.as_data().unwrap().open("container").unwrap();
        container.as_data().unwrap().close("container").unwrap();
        let expiry = Utc::now() - chrono::Duration::seconds(1);
        dlm.add_drop(&container, Some(expiry), 0);

        dlm.sweep_once();

        assert_eq!(container.as_data().unwrap().status(), DropStatus::Deleted);
        assert_eq!(child.as_data().unwrap().status(), DropStatus::Deleted);
    }

    #[test]
    fn under_replicated_record_invokes_hook() {
        struct CountingHooks(std::sync::atomic::AtomicUsize);
        impl DlmHooks for CountingHooks {
            fn replicate(&self, _record: &DlmRecord) -> Result<()> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        }
        let hooks = Arc::new(CountingHooks(std::sync::atomic::AtomicUsize::new(0)));
        let dlm = Dlm::with_hooks(DlmConfig::default(), hooks.clone());
        let d = memory_drop("A");
        dlm.add_drop(&d, None, 2);
        dlm.sweep_once();
        assert_eq!(hooks.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
