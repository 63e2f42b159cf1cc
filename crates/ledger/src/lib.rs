//! Append-only usage ledger for aula.
//!
//! Exactly one record is written per turn — by the router shortcut, the
//! cache hit, or the post-model finalizer, whichever completed the turn.
//! Recording happens during stream finalization, never before first byte.

use aula_core::error::StoreError;
use aula_core::message::TenantId;
use aula_core::store::UsageStore;
use aula_core::usage::{UsageRecord, UsageSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Aggregated usage for one tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantUsageSummary {
    /// Total turns recorded.
    pub turns: u64,
    /// Turns served by a model.
    pub model_turns: u64,
    /// Turns served from the response cache.
    pub cached_turns: u64,
    /// Turns served by the intent router.
    pub router_turns: u64,
    /// Total input tokens across model turns.
    pub input_tokens: u64,
    /// Total output tokens across model turns.
    pub output_tokens: u64,
}

/// The usage ledger — a thin, append-only facade over a `UsageStore`.
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Append one record for a finished turn.
    ///
    /// A store failure here is fatal for the turn's bookkeeping but must not
    /// crash the serving process or abort an already-flushed stream; callers
    /// log and move on.
    pub async fn record(&self, record: UsageRecord) -> Result<(), StoreError> {
        debug!(
            tenant = %record.tenant,
            message_id = %record.message_id,
            source = %record.source,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cached = record.cached,
            "Recording turn usage"
        );
        self.store.append(record).await.inspect_err(|e| {
            error!(error = %e, "Usage record append failed");
        })
    }

    /// Aggregate a tenant's usage.
    pub async fn summary(&self, tenant: &TenantId) -> Result<TenantUsageSummary, StoreError> {
        let records = self.store.for_tenant(tenant).await?;
        let mut summary = TenantUsageSummary::default();
        for record in &records {
            summary.turns += 1;
            match record.source {
                UsageSource::Model => summary.model_turns += 1,
                UsageSource::Cache => summary.cached_turns += 1,
                UsageSource::Router => summary.router_turns += 1,
            }
            summary.input_tokens += u64::from(record.input_tokens);
            summary.output_tokens += u64::from(record.output_tokens);
        }
        Ok(summary)
    }
}
