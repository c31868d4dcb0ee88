//! Per-drop bookkeeping the DLM keeps independent of the drop itself.

use chrono::{DateTime, Utc};

use dropgraph_core::{Oid, Uid};

#[derive(Debug, Clone)]
pub struct DlmRecord {
    pub oid: Oid,
    pub uid: Uid,
    pub create_time: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub desired_replicas: u32,
    pub replica_uris: Vec<String>,
    pub access_count: u64,
}

impl DlmRecord {
    pub fn new(oid: Oid, uid: Uid, expiration_date: Option<DateTime<Utc>>, desired_replicas: u32) -> Self {
        Self {
            oid,
            uid,
            create_time: Utc::now(),
            expiration_date,
            desired_replicas,
            replica_uris: Vec::new(),
            access_count: 0,
        }
    }

    pub fn is_under_replicated(&self) -> bool {
        (self.replica_uris.len() as u32) < self.desired_replicas
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration_date, Some(t) if now > t)
    }
}
