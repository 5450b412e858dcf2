//! Job Client Proxy: submit a bulk email job, then follow it to a terminal
//! state by polling, shortened by pushed terminal events when available.

pub mod api;
pub mod push;
pub mod summary;
pub mod tracker;

pub use api::{ClientError, HttpJobApi, JobApi, JobStatus, OutcomeView, SessionIdentity, SubmitJob};
pub use push::{ChannelPushSource, PushSource, SseEventSource, SseFrame, SseParser};
pub use summary::JobSummary;
pub use tracker::{JobTracker, TerminalLatch, TrackError, TrackHandle, TrackerConfig};
