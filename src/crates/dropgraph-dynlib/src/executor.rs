//! [`AppExecutor`] implementation that drives a native shared-object app,
//! translating its `read`/`write` callbacks into the owning drops'
//! `open/read/close`/`write` operations and its `running`/`done` callbacks
//! into [`AppDrop`] exec-status transitions.
//!
//! The native `run` call is blocking by contract (it is ordinary C/C++/Fortran
//! code, not an async task), so the whole descriptor build + `init` + `run`
//! sequence happens inside [`tokio::task::spawn_blocking`]; nothing here ever
//! calls back into async code from native code's stack.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use async_trait::async_trait;
use dropgraph_core::{AppExecutor, DropGraph, DropHandle, NodeIndex};
use tracing::{debug, error, warn};

use crate::abi::{CDlgApp, CDlgInput, CDlgOutput, CDlgParam};
use crate::error::{DynlibError, Result};
use crate::loader::NativeLibrary;

/// Whether the app being run is a barrier or a streaming app, decided by
/// which `AppExecutor` method dispatched into here. Only streaming apps are
/// allowed to drive their own exec-status transitions through `running`/
/// `done` — a barrier app's transitions are owned entirely by the engine.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CallbackMode {
    Barrier,
    Streaming,
}

/// Per-input context handed to the native code as the opaque `ctx` pointer
/// on [`CDlgInput`]. `cursor` tracks how many bytes this input has already
/// handed the library, since the native `read(buf, n)` signature carries no
/// position of its own.
struct InputCtx {
    drop: DropHandle,
    oid_c: CString,
    uid_c: CString,
    cursor: AtomicU64,
}

struct OutputCtx {
    drop: DropHandle,
    oid_c: CString,
    uid_c: CString,
}

/// Per-app context handed to the native code as `app.ctx`. Streaming `run`
/// calls mutate `final_status` from inside `done()`; the executor reads it
/// back once `run` returns.
struct AppCtx {
    app_node: DropHandle,
    mode: CallbackMode,
    final_status: AtomicI32,
    started: std::sync::atomic::AtomicBool,
}

extern "C" fn read_trampoline(ctx: *mut c_void, buf: *mut u8, n: usize) -> isize {
    if ctx.is_null() || buf.is_null() {
        return -1;
    }
    let input = unsafe { &*(ctx as *const InputCtx) };
    let Some(data) = input.drop.as_data() else { return -1 };
    let subject = input.oid_c.to_str().unwrap_or("");
    let position = input.cursor.load(Ordering::SeqCst);
    match data.read_stream(subject, position, n) {
        Ok(bytes) => {
            if bytes.is_empty() {
                return 0;
            }
            let len = bytes.len().min(n);
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, len) };
            input.cursor.fetch_add(len as u64, Ordering::SeqCst);
            len as isize
        }
        Err(e) => {
            warn!(subject, error = %e, "native read failed");
            -1
        }
    }
}

extern "C" fn write_trampoline(ctx: *mut c_void, buf: *const u8, n: usize) -> isize {
    if ctx.is_null() || buf.is_null() {
        return -1;
    }
    let output = unsafe { &*(ctx as *const OutputCtx) };
    let Some(data) = output.drop.as_data() else { return -1 };
    let subject = output.oid_c.to_str().unwrap_or("");
    if let Err(e) = data.open(subject) {
        warn!(subject, error = %e, "native write could not open output");
        return -1;
    }
    let slice = unsafe { std::slice::from_raw_parts(buf, n) };
    match data.write(subject, slice) {
        Ok(written) => written as isize,
        Err(e) => {
            warn!(subject, error = %e, "native write failed");
            -1
        }
    }
}

extern "C" fn running_trampoline(ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    let app = unsafe { &*(ctx as *const AppCtx) };
    if app.mode != CallbackMode::Streaming {
        debug!("ignoring running() callback from a barrier app");
        return;
    }
    if app.started.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(a) = app.app_node.as_app() {
        if let Err(e) = a.start(app.app_node.oid.as_str()) {
            error!(oid = %app.app_node.oid, error = %e, "native app's running() callback rejected");
        }
    }
}

extern "C" fn done_trampoline(ctx: *mut c_void, status: c_int) {
    if ctx.is_null() {
        return;
    }
    let app = unsafe { &*(ctx as *const AppCtx) };
    app.final_status.store(status, Ordering::SeqCst);
    if app.mode != CallbackMode::Streaming {
        debug!("ignoring done() callback from a barrier app");
        return;
    }
    if let Some(a) = app.app_node.as_app() {
        let oid = app.app_node.oid.as_str();
        let result = if status == crate::abi::CDLG_STATUS_OK { a.finish(oid) } else { a.fail(oid) };
        if let Err(e) = result {
            error!(oid, error = %e, "native app's done() callback rejected");
        }
    }
}

/// Drives app drops backed by a native shared object. One instance can run
/// any number of apps as long as each app's `lib_path` (set on its
/// `AppDrop` by the graph builder) resolves to a loadable library; the
/// library itself is reloaded per run rather than cached, since `run` is
/// expected to be called at most once per deployed app.
#[derive(Default)]
pub struct NativeLibExecutor;

impl NativeLibExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn run_native(&self, graph: &DropGraph, app_idx: NodeIndex, mode: CallbackMode) -> dropgraph_core::Result<()> {
        let app_node = graph.node(app_idx).clone();
        let app = app_node.as_app().ok_or_else(|| {
            dropgraph_core::DropError::invalid_state(app_node.oid.as_str(), "not an app drop")
        })?;
        let lib_path = app
            .lib_path
            .clone()
            .ok_or_else(|| dropgraph_core::DropError::InvalidLibrary(app_node.oid.to_string(), "no lib_path configured".into()))?;
        let init_params = app.init_params.clone();

        let edges = app_node.edges.read().clone();
        let inputs: Vec<DropHandle> = edges.inputs.iter().map(|&i| graph.node(i).clone()).collect();
        let streaming_inputs: Vec<DropHandle> = edges.streaming_inputs.iter().map(|&i| graph.node(i).clone()).collect();
        let outputs: Vec<DropHandle> = edges.outputs.iter().map(|&i| graph.node(i).clone()).collect();

        let result = tokio::task::spawn_blocking(move || {
            invoke_native(&lib_path, &init_params, app_node, inputs, streaming_inputs, outputs, mode)
        })
        .await
        .map_err(|e| dropgraph_core::DropError::invalid_state("dynlib", format!("native task panicked: {e}")))?;

        result.map_err(Into::into)
    }
}

#[async_trait]
impl AppExecutor for NativeLibExecutor {
    async fn execute(&self, graph: &DropGraph, app_idx: NodeIndex) -> dropgraph_core::Result<()> {
        self.run_native(graph, app_idx, CallbackMode::Barrier).await
    }

    async fn execute_streaming(&self, graph: &DropGraph, app_idx: NodeIndex) -> dropgraph_core::Result<()> {
        self.run_native(graph, app_idx, CallbackMode::Streaming).await
    }
}

fn invoke_native(
    lib_path: &str,
    init_params: &HashMap<String, String>,
    app_node: DropHandle,
    inputs: Vec<DropHandle>,
    streaming_inputs: Vec<DropHandle>,
    outputs: Vec<DropHandle>,
    mode: CallbackMode,
) -> Result<()> {
    let library = NativeLibrary::load(lib_path)?;

    let input_ctxs: Vec<Box<InputCtx>> = inputs
        .iter()
        .map(|d| {
            Box::new(InputCtx {
                drop: d.clone(),
                oid_c: CString::new(d.oid.as_str()).unwrap_or_default(),
                uid_c: CString::new(d.uid.as_str()).unwrap_or_default(),
                cursor: AtomicU64::new(0),
            })
        })
        .collect();
    let streaming_ctxs: Vec<Box<InputCtx>> = streaming_inputs
        .iter()
        .map(|d| {
            Box::new(InputCtx {
                drop: d.clone(),
                oid_c: CString::new(d.oid.as_str()).unwrap_or_default(),
                uid_c: CString::new(d.uid.as_str()).unwrap_or_default(),
                cursor: AtomicU64::new(0),
            })
        })
        .collect();
    let output_ctxs: Vec<Box<OutputCtx>> = outputs
        .iter()
        .map(|d| {
            Box::new(OutputCtx {
                drop: d.clone(),
                oid_c: CString::new(d.oid.as_str()).unwrap_or_default(),
                uid_c: CString::new(d.uid.as_str()).unwrap_or_default(),
            })
        })
        .collect();

    let name_strings: Vec<CString> = inputs
        .iter()
        .chain(streaming_inputs.iter())
        .chain(outputs.iter())
        .map(|d| CString::new(d.oid.as_str()).unwrap_or_default())
        .collect();
    let mut name_idx = 0usize;

    let c_inputs: Vec<CDlgInput> = input_ctxs
        .iter()
        .map(|ctx| {
            let name = name_strings[name_idx].as_ptr();
            name_idx += 1;
            CDlgInput {
                uid: ctx.uid_c.as_ptr(),
                oid: ctx.oid_c.as_ptr(),
                name,
                status: 0,
                ctx: ctx.as_ref() as *const InputCtx as *mut c_void,
                read: read_trampoline,
            }
        })
        .collect();
    let c_streaming_inputs: Vec<CDlgInput> = streaming_ctxs
        .iter()
        .map(|ctx| {
            let name = name_strings[name_idx].as_ptr();
            name_idx += 1;
            CDlgInput {
                uid: ctx.uid_c.as_ptr(),
                oid: ctx.oid_c.as_ptr(),
                name,
                status: 0,
                ctx: ctx.as_ref() as *const InputCtx as *mut c_void,
                read: read_trampoline,
            }
        })
        .collect();
    let c_outputs: Vec<CDlgOutput> = output_ctxs
        .iter()
        .map(|ctx| {
            let name = name_strings[name_idx].as_ptr();
            name_idx += 1;
            CDlgOutput {
                uid: ctx.uid_c.as_ptr(),
                oid: ctx.oid_c.as_ptr(),
                name,
                ctx: ctx.as_ref() as *const OutputCtx as *mut c_void,
                write: write_trampoline,
            }
        })
        .collect();

    let app_ctx = Box::new(AppCtx {
        app_node: app_node.clone(),
        mode,
        final_status: AtomicI32::new(crate::abi::CDLG_STATUS_OK),
        started: std::sync::atomic::AtomicBool::new(false),
    });

    let appname = CString::new(app_node.oid.as_str()).unwrap_or_default();
    let uid = CString::new(app_node.uid.as_str()).unwrap_or_default();
    let oid = CString::new(app_node.oid.as_str()).unwrap_or_default();

    let mut c_app = CDlgApp {
        appname: appname.as_ptr(),
        uid: uid.as_ptr(),
        oid: oid.as_ptr(),
        inputs: c_inputs.as_ptr(),
        n_inputs: c_inputs.len(),
        streaming_inputs: c_streaming_inputs.as_ptr(),
        n_streaming_inputs: c_streaming_inputs.len(),
        outputs: c_outputs.as_ptr(),
        n_outputs: c_outputs.len(),
        running: running_trampoline,
        done: done_trampoline,
        ctx: app_ctx.as_ref() as *const AppCtx as *mut c_void,
    };

    let params: Vec<(CString, CString)> = init_params
        .iter()
        .map(|(k, v)| (CString::new(k.as_str()).unwrap_or_default(), CString::new(v.as_str()).unwrap_or_default()))
        .collect();
    let c_params: Vec<CDlgParam> = params.iter().map(|(k, v)| CDlgParam { key: k.as_ptr(), value: v.as_ptr() }).collect();

    let init_status = unsafe { (library.init)(&mut c_app as *mut CDlgApp, c_params.as_ptr(), c_params.len()) };
    if init_status != crate::abi::CDLG_STATUS_OK {
        return Err(DynlibError::InvalidLibrary(lib_path.to_string(), format!("init returned status {init_status}")));
    }

    let run_status = unsafe { (library.run)(&mut c_app as *mut CDlgApp) };

    if mode == CallbackMode::Streaming {
        let observed = app_ctx.final_status.load(Ordering::SeqCst);
        if observed != crate::abi::CDLG_STATUS_OK || run_status != crate::abi::CDLG_STATUS_OK {
            return Err(DynlibError::InvalidLibrary(
                lib_path.to_string(),
                format!("run returned status {run_status}, done() reported {observed}"),
            ));
        }
    } else if run_status != crate::abi::CDLG_STATUS_OK {
        return Err(DynlibError::InvalidLibrary(lib_path.to_string(), format!("run returned status {run_status}")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropgraph_core::drop::AppDrop;
    use dropgraph_core::{AppKind, DropGraph, DropNode, ExecutionMode, Oid, Uid};

    #[tokio::test]
    async fn missing_lib_path_is_rejected_before_loading_anything() {
        let mut graph = DropGraph::new();
        let app = DropNode::new_app(Oid::new("app"), Uid::generate(), AppDrop::new(AppKind::Barrier), ExecutionMode::Drop);
        let idx = graph.add_node(app);

        let executor = NativeLibExecutor::new();
        let err = executor.execute(&graph, idx).await.unwrap_err();
        assert!(err.to_string().contains("no lib_path configured"));
    }

    #[tokio::test]
    async fn unloadable_library_surfaces_as_invalid_library_error() {
        let mut graph = DropGraph::new();
        let app_drop = AppDrop::new(AppKind::Barrier).with_library("/nonexistent/libmissing.so".to_string(), HashMap::new());
        let app = DropNode::new_app(Oid::new("app"), Uid::generate(), app_drop, ExecutionMode::Drop);
        let idx = graph.add_node(app);

        let executor = NativeLibExecutor::new();
        let err = executor.execute(&graph, idx).await.unwrap_err();
        assert!(matches!(err, dropgraph_core::DropError::InvalidLibrary(_, _)));
    }
}
