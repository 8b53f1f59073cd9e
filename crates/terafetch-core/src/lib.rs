//! Segmented HTTP download engine for share-service direct URLs.
//!
//! The pipeline: a resolver produces `FileMetadata` (direct URL, size,
//! filename), the planner partitions the file into byte-range segments, a
//! worker pool streams them through one shared HTTP transport into a
//! preallocated part file, and the coordinator persists resume state until
//! the final atomic rename.

pub mod auth;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod error;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod ratelimit;
pub mod resolver;
pub mod storage;
pub mod transport;

pub use auth::AuthContext;
pub use cancel::CancelToken;
pub use config::DownloadConfig;
pub use engine::{DownloadEngine, EngineTuning};
pub use error::{ErrorKind, FetchError, Severity};
pub use progress::ProgressFn;
pub use resolver::{DirectResolver, FileMetadata, LinkResolver};
