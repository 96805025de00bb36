//! Link relay pipeline: fetch, classify, expand or split, upload.
//!
//! This crate holds the **business logic** for relaying objects shared
//! through an object-storage link to a messaging destination. It has no
//! HTTP or chat dependencies: the application supplies a [`Fetcher`] and
//! an [`Uploader`] that bridge to the real services.
//!
//! # Pipeline
//!
//! 1. **Parse**: find a file link in the incoming text
//! 2. **Fetch**: download the object into a per-job staging directory
//! 3. **Classify**: ZIP archive or plain file, by content
//! 4. **Expand / Split**: unpack archives, cut oversized files into parts
//! 5. **Upload**: send every item with its caption, deleting it afterwards
//!
//! The staging directory is removed once the job ends, whatever the outcome.

pub mod error;
pub mod fetch;
pub mod link;
pub mod pipeline;
pub mod types;
pub mod upload;

pub use error::{FetchError, JobFailure, RelayError, UploadError};
pub use fetch::{BoxFuture, FetchPlan, FetchedObject, Fetcher, RemoteObject, fetch, plan_fetch};
pub use link::{LinkKind, SourceLink};
pub use pipeline::RelayOrchestrator;
pub use types::{EmptyObjectPolicy, JobReport, JobState, RelayEvent, RelaySettings, TransferJob};
pub use upload::{DEFAULT_CAPTION, Uploader, member_caption};
