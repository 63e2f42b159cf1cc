//! The read-service seam backing the domain tools.
//!
//! `EnrollmentReads` is implemented outside this pipeline by the
//! institution's query services. Every method takes the tenant explicitly;
//! implementations must not leak data across tenants.

use aula_core::message::TenantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Revenue collected and invoiced for one calendar month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueSummary {
    /// Month in `YYYY-MM` form.
    pub month: String,
    pub collected_total: f64,
    pub invoiced_total: f64,
    pub payment_count: u32,
    pub currency: String,
}

/// One program in the tenant's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramInfo {
    pub code: String,
    pub name: String,
    pub modality: String,
    pub duration_months: u32,
    pub tuition: f64,
    pub enrollment_open: bool,
}

/// One bucket of the receivables aging report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgingBucket {
    /// Bucket label, e.g. "0-30", "31-60", "61-90", "90+".
    pub bucket: String,
    pub account_count: u32,
    pub outstanding_total: f64,
}

/// One student matched by a fuzzy search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentHit {
    pub id: String,
    pub full_name: String,
    pub program: String,
    pub status: String,
    pub balance: f64,
}

/// One advisor's performance rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorStats {
    pub advisor: String,
    pub assigned_leads: u32,
    pub enrollments: u32,
    pub conversion_rate: f32,
}

/// Failure of a backing read-service call.
#[derive(Debug, Clone)]
pub struct ServiceError(pub String);

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "read service error: {}", self.0)
    }
}

impl std::error::Error for ServiceError {}

/// Read-only queries over a tenant's enrollment and billing data.
#[async_trait]
pub trait EnrollmentReads: Send + Sync {
    /// Revenue summary for a month (`YYYY-MM`).
    async fn monthly_revenue(
        &self,
        tenant: &TenantId,
        month: &str,
    ) -> Result<RevenueSummary, ServiceError>;

    /// Count of currently active students.
    async fn active_students(&self, tenant: &TenantId) -> Result<u32, ServiceError>;

    /// The full program catalog.
    async fn programs(&self, tenant: &TenantId) -> Result<Vec<ProgramInfo>, ServiceError>;

    /// The receivables aging report, bucketed by days overdue.
    async fn aging_report(&self, tenant: &TenantId) -> Result<Vec<AgingBucket>, ServiceError>;

    /// All students, for fuzzy matching in the search tool.
    async fn students(&self, tenant: &TenantId) -> Result<Vec<StudentHit>, ServiceError>;

    /// Per-advisor performance rollups.
    async fn advisor_performance(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<AdvisorStats>, ServiceError>;
}
