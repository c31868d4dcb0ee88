//! The C ABI a native application library must expose, mirroring the
//! `CDlgApp`/`CDlgInput`/`CDlgOutput` structures the original ctypes bridge
//! builds and hands to the loaded symbols by pointer.
//!
//! Every struct here is `#[repr(C)]` and every callback is `extern "C"` so
//! the layout is exactly what a library compiled against a matching C header
//! would expect; nothing on this side is Rust-ABI-dependent.

use std::os::raw::{c_char, c_int, c_void};

/// One input wired to a native app: a read callback plus enough identity
/// for the library to log or branch on. `ctx` is opaque to the library and
/// must be passed back unchanged to `read`.
#[repr(C)]
pub struct CDlgInput {
    pub uid: *const c_char,
    pub oid: *const c_char,
    pub name: *const c_char,
    pub status: c_int,
    pub ctx: *mut c_void,
    pub read: extern "C" fn(ctx: *mut c_void, buf: *mut u8, n: usize) -> isize,
}

/// One output wired to a native app: a write callback plus identity.
#[repr(C)]
pub struct CDlgOutput {
    pub uid: *const c_char,
    pub oid: *const c_char,
    pub name: *const c_char,
    pub ctx: *mut c_void,
    pub write: extern "C" fn(ctx: *mut c_void, buf: *const u8, n: usize) -> isize,
}

/// One `(key, value)` init parameter pair, part of the null-terminated
/// vector `init` receives.
#[repr(C)]
pub struct CDlgParam {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// The descriptor passed to every entry point. `running`/`done` are
/// callbacks the library invokes to signal its own state transitions
/// (streaming apps only — a barrier app signals completion by returning
/// from `run`). `ctx` is the adapter's own opaque token, handed back
/// unchanged on every callback into `running`/`done`.
#[repr(C)]
pub struct CDlgApp {
    pub appname: *const c_char,
    pub uid: *const c_char,
    pub oid: *const c_char,
    pub inputs: *const CDlgInput,
    pub n_inputs: usize,
    pub streaming_inputs: *const CDlgInput,
    pub n_streaming_inputs: usize,
    pub outputs: *const CDlgOutput,
    pub n_outputs: usize,
    pub running: extern "C" fn(ctx: *mut c_void),
    pub done: extern "C" fn(ctx: *mut c_void, status: c_int),
    pub ctx: *mut c_void,
}

/// `init(app, params, n_params) -> status`. Called once, before `run`.
pub type CDlgInitFn = unsafe extern "C" fn(app: *mut CDlgApp, params: *const CDlgParam, n_params: usize) -> c_int;

/// `run(app) -> status`. For a barrier app this blocks until the app's
/// whole computation is done and the return value is the final status
/// (`0` success). For a streaming app this blocks for the lifetime of the
/// run; the library calls `running()`/`done()` on `app` as it goes, and
/// pulls streaming input via `CDlgInput::read`, which blocks the calling
/// thread until either bytes are available or the input reaches a terminal
/// status (see `DataDrop::read_stream`). There is no separate push entry
/// point: a library that wants `dataWritten`/`dropCompleted`-style
/// notification gets it by blocking in `read` between chunks instead.
pub type CDlgRunFn = unsafe extern "C" fn(app: *mut CDlgApp) -> c_int;

/// Status code a native `run`/`done` call uses, mirrored from
/// [`dropgraph_core::ExecStatus`] at the ABI boundary. `0` success, nonzero
/// failure (the exact nonzero value is not interpreted, only logged).
pub const CDLG_STATUS_OK: c_int = 0;
