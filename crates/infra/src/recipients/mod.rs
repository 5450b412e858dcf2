//! Recipient Resolver: job selection → ordered recipient ids.

pub mod filter;
pub mod resolver;

pub use filter::{Condition, Filter, FilterError, FilterOp};
pub use resolver::{RecipientResolver, ResolutionError, ResolveError};
