//! `forgecrm-core` — shared primitives for the bulk email subsystem.
//!
//! This crate contains **pure** types (no IO, no async): identifiers, the job
//! lifecycle vocabulary and validated value objects.

pub mod error;
pub mod id;
pub mod job;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, RecipientId, UserId};
pub use job::{JobState, OutcomeStatus};
pub use value_object::{EmailAddress, ValueObject};
