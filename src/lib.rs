//! Per-file AES-256-CBC encryption with a batch orchestrator.
//!
//! Each file becomes one self-describing container (`.enc`) that carries its
//! IV, its encrypted original name and its original size ahead of the padded
//! ciphertext. [`batch`] drives many files at once on a worker pool with
//! pause, resume and stop, optional structure mirroring and an optional
//! staging area that is written back once the batch is done.

pub mod batch;
pub mod container;
pub mod control;
pub mod crypto;
pub mod dirname;
pub mod error;
pub mod logging;
pub mod progress;
pub mod staging;
pub mod streaming;

pub use batch::{
    run_batch, BatchEvent, BatchHandle, BatchJob, BatchReport, BatchRunner, OutputPolicy,
    StagingOptions, StructureOptions,
};
pub use control::{ControlSignal, SharedControl};
pub use crypto::Key;
pub use error::{CipherError, Result};
pub use logging::{LogLevel, LogSink, TracingSink};
pub use staging::{SpaceProbe, WriteBackReport};
pub use streaming::{Engine, Mode};
