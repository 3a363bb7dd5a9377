//! Warden Executor - runs the host package manager.
//!
//! Every child process is deadline-bounded, has its output captured into
//! capped buffers, and is killed and reaped on timeout or cancellation.

#![deny(unsafe_code)]

mod error;
pub mod install;
pub mod process;
pub mod verify;

pub use error::{ExecutorError, ExecutorResult};
pub use install::{InstallerConfig, PackageInstaller, PipInstaller};
pub use process::{ProcessOutput, ProcessSpec};
pub use verify::{import_name, VerificationProbe};
