//! # dropgraph-dynlib - the dynamic-library app adapter
//!
//! Runs an app drop whose computation lives in a native shared object rather
//! than in-process Rust, loaded at run time with `libloading` and driven
//! through a small C ABI (see [`abi`]). The native code reads its inputs and
//! writes its outputs through callbacks that close back over the owning
//! drops' own `read`/`write` operations, so from the rest of the runtime's
//! point of view a [`NativeLibExecutor`]-driven app is indistinguishable
//! from an in-process one.

pub mod abi;
pub mod error;
pub mod executor;
pub mod loader;

pub use error::{DynlibError, Result};
pub use executor::NativeLibExecutor;
pub use loader::NativeLibrary;
