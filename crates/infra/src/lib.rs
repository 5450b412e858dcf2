//! Infrastructure for bulk lead emailing: configuration, lead records,
//! recipient resolution, message generation and delivery, and the job runner.

pub mod config;
pub mod event_bus;
pub mod jobs;
pub mod messaging;
pub mod recipients;
pub mod records;

pub use config::BulkEmailConfig;
