// crates/core/src/lib.rs
pub mod artifacts;
pub mod config;
pub mod error;
pub mod event;
pub mod hub;
pub mod limiter;
pub mod metadata;
pub mod paths;
pub mod process;
pub mod progress;
pub mod registry;
pub mod service;
pub mod tool;

pub use artifacts::{ArtifactStore, Delivery, SweepReport};
pub use config::{AppConfig, ConfigError};
pub use error::*;
pub use event::ProgressEvent;
pub use hub::{HubMessage, NotificationHub, Subscription};
pub use metadata::{BatchFailure, BatchItem, BatchOutcome, MediaInfo, PlaylistEntry, PlaylistInfo};
pub use registry::{CancelOutcome, JobRegistry, JobSnapshot, JobStatus};
pub use service::{ConversionRequest, ConversionService};
pub use tool::{OptionError, OutputKind, Quality};
