//! Transcode submission and status query contracts.
//!
//! The surface the upload handler and CRUD layer call into:
//! - `TranscodeSubmitter::submit`: enqueue a transcode job
//! - `TranscodeSubmitter::transcode_status`: "is my video ready yet"
//! - `TranscodeSubmitter::request_cancel`: video deleted mid-flight

pub mod error;
pub mod submit;

pub use error::{IngestError, IngestResult};
pub use submit::{RenditionStatusView, SubmitRequest, TranscodeStatus, TranscodeSubmitter};
