//! HTTP API for bulk lead emailing: submission, status, listing and the
//! terminal-event stream.

pub mod app;
pub mod context;
pub mod middleware;
