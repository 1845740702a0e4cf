//! # Skiff Container Runtime
//!
//! Skiff runs a command inside fresh mount, PID, UTS, network and IPC
//! namespaces, on an overlay root built from an unpacked image, under cgroup
//! v1 limits and optionally attached to a bridge network.
//!
//! ## Usage
//!
//! ```no_run
//! use skiff::runtime::{RunOptions, Runtime};
//! use skiff_common::SkiffPaths;
//!
//! # async fn example() -> skiff_common::SkiffResult<()> {
//! let runtime = Runtime::new(SkiffPaths::default());
//! let outcome = runtime
//!     .run(RunOptions {
//!         image: "busybox".to_string(),
//!         command: vec!["top".to_string()],
//!         ..RunOptions::default()
//!     })
//!     .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod filesystem;
pub mod namespace;
pub mod process;
pub mod runtime;

pub use runtime::Runtime;
