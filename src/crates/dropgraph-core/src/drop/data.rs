//! Data drops: the passive, typed storage nodes of the graph.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{DropError, Result};
use crate::events::{DropEvent, Topic};
use crate::ids::{Oid, Uid};
use crate::status::DropStatus;

/// Storage backing a data drop. `Memory` and `File` are implemented fully;
/// `Directory` and `Container` delegate their status to their children and
/// never hold bytes of their own.
#[derive(Debug)]
pub enum Payload {
    Memory(Mutex<Vec<u8>>),
    File { path: PathBuf, handle: Mutex<Option<std::fs::File>> },
    Directory { path: PathBuf, children: RwLock<Vec<Oid>> },
    Container { children: RwLock<Vec<Oid>> },
}

/// Which [`Payload`] variant a data drop uses, carried separately from the
/// payload itself so the kind is cheaply `Copy`-able for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Memory,
    File,
    Directory,
    Container,
}

/// A human-readable descriptor returned by `getDescriptor`-style introspection
/// calls; intentionally separate from [`Payload`] so callers never see the
/// raw storage handle.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub oid: Oid,
    pub uid: Uid,
    pub status: DropStatus,
    pub size: Option<u64>,
}

/// A data drop: holds a [`Payload`], a [`DropStatus`], and the bookkeeping
/// needed to enforce the write-once/read-many contract.
#[derive(Debug)]
pub struct DataDrop {
    pub kind: DataKind,
    status: RwLock<DropStatus>,
    payload: Payload,
    size_bound: Option<u64>,
    written: AtomicU64,
    readable_while_writing: bool,
    open_readers: AtomicU64,
    /// Paired with `notify` to let a streaming consumer's `read_stream`
    /// block until more bytes land or the drop reaches a terminal status,
    /// rather than busy-polling. Woken on every `write`/`close`/error.
    notify_gate: Mutex<()>,
    notify: Condvar,
}

impl DataDrop {
    pub fn new_memory(readable_while_writing: bool, size_bound: Option<u64>) -> Self {
        Self {
            kind: DataKind::Memory,
            status: RwLock::new(DropStatus::Initialized),
            payload: Payload::Memory(Mutex::new(Vec::new())),
            size_bound,
            written: AtomicU64::new(0),
            readable_while_writing,
            open_readers: AtomicU64::new(0),
            notify_gate: Mutex::new(()),
            notify: Condvar::new(),
        }
    }

    pub fn new_file(path: PathBuf, size_bound: Option<u64>) -> Self {
        Self {
            kind: DataKind::File,
            status: RwLock::new(DropStatus::Initialized),
            payload: Payload::File { path, handle: Mutex::new(None) },
            size_bound,
            written: AtomicU64::new(0),
            readable_while_writing: false,
            open_readers: AtomicU64::new(0),
            notify_gate: Mutex::new(()),
            notify: Condvar::new(),
        }
    }

    pub fn new_directory(path: PathBuf) -> Self {
        Self {
            kind: DataKind::Directory,
            status: RwLock::new(DropStatus::Initialized),
            payload: Payload::Directory { path, children: RwLock::new(Vec::new()) },
            size_bound: None,
            written: AtomicU64::new(0),
            readable_while_writing: false,
            open_readers: AtomicU64::new(0),
            notify_gate: Mutex::new(()),
            notify: Condvar::new(),
        }
    }

    pub fn new_container() -> Self {
        Self {
            kind: DataKind::Container,
            status: RwLock::new(DropStatus::Initialized),
            payload: Payload::Container { children: RwLock::new(Vec::new()) },
            size_bound: None,
            written: AtomicU64::new(0),
            readable_while_writing: false,
            open_readers: AtomicU64::new(0),
            notify_gate: Mutex::new(()),
            notify: Condvar::new(),
        }
    }

    pub fn status(&self) -> DropStatus {
        *self.status.read()
    }

    fn set_status(&self, next: DropStatus, subject: &str) -> Result<()> {
        let mut status = self.status.write();
        if !status.can_transition(next) {
            return Err(DropError::invalid_state(
                subject,
                format!("cannot move from {:?} to {:?}", *status, next),
            ));
        }
        *status = next;
        Ok(())
    }

    /// Open the drop for writing. A container/directory has nothing to open;
    /// a memory/file drop moves `INITIALIZED -> WRITING` on first open.
    pub fn open(&self, subject: &str) -> Result<()> {
        let status = self.status();
        if status == DropStatus::Writing {
            return Ok(());
        }
        self.set_status(DropStatus::Writing, subject)
    }

    /// Append `data` to the drop. Fails if the drop is not writable or the
    /// write would exceed the declared size bound.
    pub fn write(&self, subject: &str, data: &[u8]) -> Result<usize> {
        if !self.status().is_writable() {
            return Err(DropError::invalid_state(subject, "drop is not open for writing"));
        }
        let new_total = self.written.load(Ordering::SeqCst) + data.len() as u64;
        if let Some(bound) = self.size_bound {
            if new_total > bound {
                return Err(DropError::Overflow(subject.to_string(), bound as usize));
            }
        }
        match &self.payload {
            Payload::Memory(buf) => buf.lock().extend_from_slice(data),
            Payload::File { path, handle } => {
                use std::io::Write;
                let mut guard = handle.lock();
                if guard.is_none() {
                    *guard = Some(
                        std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(path)
                            .map_err(|e| DropError::invalid_state(subject, e.to_string()))?,
                    );
                }
                guard
                    .as_mut()
                    .expect("handle opened above")
                    .write_all(data)
                    .map_err(|e| DropError::invalid_state(subject, e.to_string()))?;
            }
            Payload::Directory { .. } | Payload::Container { .. } => {
                return Err(DropError::invalid_state(subject, "cannot write bytes to a collection drop"));
            }
        }
        self.written.store(new_total, Ordering::SeqCst);
        self.wake_stream_readers();
        Ok(data.len())
    }

    fn wake_stream_readers(&self) {
        let _guard = self.notify_gate.lock();
        self.notify.notify_all();
    }

    /// Blocking cursor read for a streaming consumer: returns up to
    /// `max_len` bytes starting at `position`, blocking until either that
    /// many bytes have arrived or the drop reaches a terminal status (in
    /// which case a short, possibly empty, read is returned — end of
    /// stream). Meant to be called from a blocking context (e.g.
    /// `tokio::task::spawn_blocking`), never from an async task directly.
    pub fn read_stream(&self, subject: &str, position: u64, max_len: usize) -> Result<Vec<u8>> {
        loop {
            let mut guard = self.notify_gate.lock();
            let available = self.written.load(Ordering::SeqCst);
            if position < available {
                return self.read_range(subject, position, max_len);
            }
            let status = self.status();
            if status.is_terminal() || status == DropStatus::Completed {
                return Ok(Vec::new());
            }
            self.notify.wait(&mut guard);
        }
    }

    fn read_range(&self, subject: &str, position: u64, max_len: usize) -> Result<Vec<u8>> {
        match &self.payload {
            Payload::Memory(buf) => {
                let buf = buf.lock();
                let start = position as usize;
                if start >= buf.len() {
                    return Ok(Vec::new());
                }
                let end = (start + max_len).min(buf.len());
                Ok(buf[start..end].to_vec())
            }
            Payload::File { path, .. } => {
                use std::io::{Read, Seek, SeekFrom};
                let mut f = std::fs::File::open(path).map_err(|e| DropError::invalid_state(subject, e.to_string()))?;
                f.seek(SeekFrom::Start(position)).map_err(|e| DropError::invalid_state(subject, e.to_string()))?;
                let mut buf = vec![0u8; max_len];
                let n = f.read(&mut buf).map_err(|e| DropError::invalid_state(subject, e.to_string()))?;
                buf.truncate(n);
                Ok(buf)
            }
            Payload::Directory { .. } | Payload::Container { .. } => {
                Err(DropError::invalid_state(subject, "cannot read bytes from a collection drop"))
            }
        }
    }

    /// Read the full contents of a memory or file drop. Requires `COMPLETED`
    /// unless the drop was constructed as readable-while-writing.
    pub fn read(&self, subject: &str) -> Result<Vec<u8>> {
        let status = self.status();
        if !(status.is_readable() || (self.readable_while_writing && status == DropStatus::Writing)) {
            return Err(DropError::invalid_state(subject, "drop is not readable yet"));
        }
        self.open_readers.fetch_add(1, Ordering::SeqCst);
        let result = match &self.payload {
            Payload::Memory(buf) => Ok(buf.lock().clone()),
            Payload::File { path, .. } => {
                std::fs::read(path).map_err(|e| DropError::invalid_state(subject, e.to_string()))
            }
            Payload::Directory { .. } | Payload::Container { .. } => {
                Err(DropError::invalid_state(subject, "cannot read bytes from a collection drop"))
            }
        };
        self.open_readers.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Close the drop for writing, moving it to `COMPLETED`. Idempotent if
    /// already completed.
    pub fn close(&self, subject: &str) -> Result<()> {
        if self.status() == DropStatus::Completed {
            return Ok(());
        }
        if let Payload::File { handle, .. } = &self.payload {
            use std::io::Write;
            if let Some(f) = handle.lock().as_mut() {
                f.flush().map_err(|e| DropError::invalid_state(subject, e.to_string()))?;
            }
        }
        self.set_status(DropStatus::Completed, subject)?;
        self.wake_stream_readers();
        Ok(())
    }

    /// Release whatever bytes this drop is holding: truncate the in-memory
    /// buffer, or close (and best-effort remove) the backing file. Safe to
    /// call more than once. Directory/container drops hold no payload of
    /// their own, so this cascades to nothing here — the caller is
    /// responsible for evicting children too (see the DLM sweeper).
    pub fn evict_payload(&self, subject: &str) {
        match &self.payload {
            Payload::Memory(buf) => {
                let mut buf = buf.lock();
                buf.clear();
                buf.shrink_to_fit();
            }
            Payload::File { path, handle } => {
                handle.lock().take();
                if let Err(e) = std::fs::remove_file(path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(subject = %subject, path = %path.display(), error = %e, "failed to remove evicted file drop's payload");
                    }
                }
            }
            Payload::Directory { .. } | Payload::Container { .. } => {}
        }
    }

    pub fn mark_expired(&self, subject: &str) -> Result<()> {
        self.set_status(DropStatus::Expired, subject)
    }

    pub fn mark_deleted(&self, subject: &str) -> Result<()> {
        self.set_status(DropStatus::Deleted, subject)
    }

    pub fn mark_error(&self, subject: &str) -> Result<()> {
        self.set_status(DropStatus::Error, subject)?;
        self.wake_stream_readers();
        Ok(())
    }

    pub fn add_child(&self, child: Oid) {
        match &self.payload {
            Payload::Directory { children, .. } | Payload::Container { children } => {
                children.write().push(child);
            }
            _ => {}
        }
    }

    pub fn children(&self) -> Vec<Oid> {
        match &self.payload {
            Payload::Directory { children, .. } | Payload::Container { children } => {
                children.read().clone()
            }
            _ => Vec::new(),
        }
    }

    pub fn size(&self) -> Option<u64> {
        match &self.payload {
            Payload::Memory(_) | Payload::File { .. } => Some(self.written.load(Ordering::SeqCst)),
            Payload::Directory { .. } | Payload::Container { .. } => None,
        }
    }

    pub fn status_event(&self, oid: &Oid, uid: &Uid, new_status: DropStatus) -> DropEvent {
        DropEvent {
            oid: oid.clone(),
            uid: uid.clone(),
            topic: Topic::Status,
            new_status: Some(new_status),
            new_exec_status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn memory_write_read_roundtrip() {
        let d = DataDrop::new_memory(false, None);
        d.open("m").unwrap();
        d.write("m", b"hello").unwrap();
        d.close("m").unwrap();
        assert_eq!(d.read("m").unwrap(), b"hello");
    }

    #[test]
    fn write_past_bound_overflows() {
        let d = DataDrop::new_memory(false, Some(4));
        d.open("m").unwrap();
        let err = d.write("m", b"hello").unwrap_err();
        assert!(matches!(err, DropError::Overflow(_, 4)));
    }

    #[test]
    fn read_before_completed_fails_unless_streaming() {
        let d = DataDrop::new_memory(false, None);
        d.open("m").unwrap();
        d.write("m", b"partial").unwrap();
        assert!(d.read("m").is_err());

        let streaming = DataDrop::new_memory(true, None);
        streaming.open("s").unwrap();
        streaming.write("s", b"partial").unwrap();
        assert_eq!(streaming.read("s").unwrap(), b"partial");
    }

    #[test]
    fn read_stream_returns_short_read_then_blocks_until_more_arrives() {
        let d = Arc::new(DataDrop::new_memory(true, None));
        d.open("s").unwrap();
        d.write("s", b"abc").unwrap();

        let chunk = d.read_stream("s", 0, 1024).unwrap();
        assert_eq!(chunk, b"abc");

        let reader = d.clone();
        let handle = std::thread::spawn(move || reader.read_stream("s", 3, 1024).unwrap());

        std::thread::sleep(std::time::Duration::from_millis(20));
        d.write("s", b"def").unwrap();
        let more = handle.join().unwrap();
        assert_eq!(more, b"def");
    }

    #[test]
    fn read_stream_returns_empty_on_eof() {
        let d = DataDrop::new_memory(true, None);
        d.open("s").unwrap();
        d.write("s", b"abc").unwrap();
        d.close("s").unwrap();
        assert_eq!(d.read_stream("s", 3, 1024).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn close_is_idempotent() {
        let d = DataDrop::new_memory(false, None);
        d.open("m").unwrap();
        d.close("m").unwrap();
        d.close("m").unwrap();
        assert_eq!(d.status(), DropStatus::Completed);
    }
}
