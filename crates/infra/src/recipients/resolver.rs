use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use forgecrm_core::RecipientId;

use super::filter::{Filter, FilterError};
use crate::jobs::types::RecipientSelection;
use crate::records::{RecordStore, RecordStoreError};

/// The filter could not be turned into a recipient query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error(transparent)]
    MalformedFilter(#[from] FilterError),

    #[error("an empty filter selects every lead; set confirm_unfiltered to proceed")]
    UnconfirmedUnfiltered,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("no recipients matched the selection")]
    EmptySelection,

    #[error(transparent)]
    Records(#[from] RecordStoreError),
}

/// Turns a selection into the ordered, deduplicated recipient list.
#[derive(Clone)]
pub struct RecipientResolver {
    records: Arc<dyn RecordStore>,
    max_filter_recipients: usize,
}

impl RecipientResolver {
    pub fn new(records: Arc<dyn RecordStore>, max_filter_recipients: usize) -> Self {
        Self {
            records,
            max_filter_recipients,
        }
    }

    pub fn resolve(&self, selection: &RecipientSelection) -> Result<Vec<RecipientId>, ResolveError> {
        let resolved = match selection {
            RecipientSelection::Explicit(ids) => dedup_preserving_order(ids),
            RecipientSelection::Filter {
                expression,
                confirm_unfiltered,
            } => self.resolve_filter(expression, *confirm_unfiltered)?,
        };

        if resolved.is_empty() {
            return Err(ResolveError::EmptySelection);
        }
        Ok(resolved)
    }

    fn resolve_filter(
        &self,
        expression: &serde_json::Value,
        confirm_unfiltered: bool,
    ) -> Result<Vec<RecipientId>, ResolveError> {
        let filter = Filter::parse(expression).map_err(ResolutionError::from)?;
        if filter.is_empty() {
            if !confirm_unfiltered {
                return Err(ResolutionError::UnconfirmedUnfiltered.into());
            }
            warn!("resolving an unrestricted filter: every lead is selected");
        }

        let mut matched: Vec<RecipientId> = self
            .records
            .list()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.id)
            .collect();

        if matched.len() > self.max_filter_recipients {
            warn!(
                matched = matched.len(),
                cap = self.max_filter_recipients,
                "filter matched more leads than allowed; truncating"
            );
            matched.truncate(self.max_filter_recipients);
        }

        debug!(count = matched.len(), conditions = filter.conditions().len(), "filter resolved");
        Ok(matched)
    }
}

fn dedup_preserving_order(ids: &[RecipientId]) -> Vec<RecipientId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
}
