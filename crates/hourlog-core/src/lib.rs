//! hourlog-core library.
//!
//! Incremental extraction from a growing access log, hourly rollover into
//! compressed archives, and the merge-dedup batch job over those archives.
//!
//! # Conventions
//!
//! - **Errors**: one `thiserror` enum per component, each mapping to an
//!   [`error::ErrorCode`].
//! - **Logging**: `tracing` macros for diagnostics; [`oplog::OpLog`] for the
//!   durable operational narrative.

pub mod archive;
pub mod clock;
pub mod compress;
pub mod config;
pub mod error;
pub mod extract;
pub mod lock;
pub mod merge;
pub mod oplog;
pub mod pipeline;
pub mod position;
pub mod timing;

pub use archive::{HourlyArchiver, Rollover};
pub use clock::{Clock, FixedClock, SystemClock};
pub use compress::{CommandCompressor, Compressor, GzipCompressor};
pub use config::Config;
pub use error::ErrorCode;
pub use extract::{ExtractOutcome, Extractor};
pub use merge::{MergeReport, MergeTool};
pub use oplog::OpLog;
pub use pipeline::{RunError, RunReport, run_once};
pub use position::{FilePositionStore, MemoryPositionStore, PositionStore};
