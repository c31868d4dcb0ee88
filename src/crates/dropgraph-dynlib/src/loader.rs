//! Loads a native app's shared object with `libloading` and resolves its
//! entry points. Mirrors the load-then-lookup-symbols shape any `libloading`
//! consumer uses: keep the `Library` alive for as long as any resolved
//! `Symbol` from it is in use.

use libloading::{Library, Symbol};

use crate::abi::{CDlgInitFn, CDlgRunFn};
use crate::error::{DynlibError, Result};

/// A loaded native app library plus its resolved entry points. Both `init`
/// and `run` are mandatory; this adapter is pull-only (native code reads
/// streaming input via the blocking `CDlgInput::read` callback), so there
/// are no other entry points to resolve. See [`crate::abi::CDlgRunFn`].
pub struct NativeLibrary {
    // Never read directly; kept alive so the resolved function pointers
    // below stay valid for the library's lifetime.
    _lib: Library,
    pub init: CDlgInitFn,
    pub run: CDlgRunFn,
}

impl NativeLibrary {
    pub fn load(path: &str) -> Result<Self> {
        let lib = unsafe { Library::new(path) }.map_err(|e| DynlibError::LoadFailed(path.to_string(), e.to_string()))?;

        let init: Symbol<CDlgInitFn> = unsafe { lib.get(b"init\0") }
            .map_err(|_| DynlibError::InvalidLibrary(path.to_string(), "missing 'init' entry point".into()))?;
        let run: Symbol<CDlgRunFn> = unsafe { lib.get(b"run\0") }
            .map_err(|_| DynlibError::InvalidLibrary(path.to_string(), "missing 'run' entry point".into()))?;
        let init = *init;
        let run = *run;

        Ok(Self { _lib: lib, init, run })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_load_failed() {
        let err = NativeLibrary::load("/nonexistent/path/libdoesnotexist.so").unwrap_err();
        assert!(matches!(err, DynlibError::LoadFailed(_, _)));
    }

    #[test]
    fn a_library_lacking_entry_points_is_invalid() {
        // libc is present on any Linux test host but exports neither `init`
        // nor `run`, so loading it exercises the "missing entry point" path
        // without requiring a purpose-built fixture `.so`.
        let candidates = ["/lib/x86_64-linux-gnu/libc.so.6", "/usr/lib/libc.so.6", "/lib/libc.so.6"];
        let Some(path) = candidates.iter().find(|p| std::path::Path::new(p).exists()) else {
            return;
        };
        let err = NativeLibrary::load(path).unwrap_err();
        assert!(matches!(err, DynlibError::InvalidLibrary(_, _)));
    }
}
