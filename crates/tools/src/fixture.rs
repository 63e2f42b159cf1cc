//! A fixture read-service with plausible demo data.
//!
//! Used by tests and the demo configuration. Holds data for exactly one
//! tenant; queries for any other tenant return empty results, which also
//! makes tenant-isolation failures visible in tests.

use async_trait::async_trait;
use aula_core::message::TenantId;

use crate::services::{
    AdvisorStats, AgingBucket, EnrollmentReads, ProgramInfo, RevenueSummary, ServiceError,
    StudentHit,
};

/// In-memory `EnrollmentReads` implementation.
pub struct FixtureReads {
    tenant: TenantId,
    fail: bool,
}

impl FixtureReads {
    /// Demo data for the given tenant.
    pub fn demo(tenant: impl Into<String>) -> Self {
        Self {
            tenant: TenantId::new(tenant),
            fail: false,
        }
    }

    /// A fixture whose every call fails — for error-path tests.
    pub fn failing(tenant: impl Into<String>) -> Self {
        Self {
            tenant: TenantId::new(tenant),
            fail: true,
        }
    }

    fn check(&self, tenant: &TenantId) -> Result<bool, ServiceError> {
        if self.fail {
            return Err(ServiceError("fixture configured to fail".into()));
        }
        Ok(tenant == &self.tenant)
    }
}

#[async_trait]
impl EnrollmentReads for FixtureReads {
    async fn monthly_revenue(
        &self,
        tenant: &TenantId,
        month: &str,
    ) -> Result<RevenueSummary, ServiceError> {
        if !self.check(tenant)? {
            return Ok(RevenueSummary {
                month: month.to_string(),
                collected_total: 0.0,
                invoiced_total: 0.0,
                payment_count: 0,
                currency: "MXN".into(),
            });
        }
        Ok(RevenueSummary {
            month: month.to_string(),
            collected_total: 487_250.0,
            invoiced_total: 612_400.0,
            payment_count: 183,
            currency: "MXN".into(),
        })
    }

    async fn active_students(&self, tenant: &TenantId) -> Result<u32, ServiceError> {
        Ok(if self.check(tenant)? { 642 } else { 0 })
    }

    async fn programs(&self, tenant: &TenantId) -> Result<Vec<ProgramInfo>, ServiceError> {
        if !self.check(tenant)? {
            return Ok(vec![]);
        }
        Ok(vec![
            ProgramInfo {
                code: "LAE".into(),
                name: "Licenciatura en Administración de Empresas".into(),
                modality: "presencial".into(),
                duration_months: 48,
                tuition: 4_850.0,
                enrollment_open: true,
            },
            ProgramInfo {
                code: "ISC".into(),
                name: "Ingeniería en Sistemas Computacionales".into(),
                modality: "mixta".into(),
                duration_months: 54,
                tuition: 5_600.0,
                enrollment_open: true,
            },
            ProgramInfo {
                code: "MBA".into(),
                name: "Maestría en Administración".into(),
                modality: "en línea".into(),
                duration_months: 24,
                tuition: 8_900.0,
                enrollment_open: false,
            },
        ])
    }

    async fn aging_report(&self, tenant: &TenantId) -> Result<Vec<AgingBucket>, ServiceError> {
        if !self.check(tenant)? {
            return Ok(vec![]);
        }
        Ok(vec![
            AgingBucket {
                bucket: "0-30".into(),
                account_count: 58,
                outstanding_total: 142_300.0,
            },
            AgingBucket {
                bucket: "31-60".into(),
                account_count: 23,
                outstanding_total: 87_150.0,
            },
            AgingBucket {
                bucket: "61-90".into(),
                account_count: 11,
                outstanding_total: 45_900.0,
            },
            AgingBucket {
                bucket: "90+".into(),
                account_count: 7,
                outstanding_total: 61_200.0,
            },
        ])
    }

    async fn students(&self, tenant: &TenantId) -> Result<Vec<StudentHit>, ServiceError> {
        if !self.check(tenant)? {
            return Ok(vec![]);
        }
        Ok(vec![
            StudentHit {
                id: "S-1041".into(),
                full_name: "María Fernanda González".into(),
                program: "LAE".into(),
                status: "activo".into(),
                balance: 0.0,
            },
            StudentHit {
                id: "S-1187".into(),
                full_name: "José Luis Hernández".into(),
                program: "ISC".into(),
                status: "activo".into(),
                balance: 3_200.0,
            },
            StudentHit {
                id: "S-0933".into(),
                full_name: "Ana Sofía Martínez".into(),
                program: "MBA".into(),
                status: "baja temporal".into(),
                balance: 12_450.0,
            },
        ])
    }

    async fn advisor_performance(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<AdvisorStats>, ServiceError> {
        if !self.check(tenant)? {
            return Ok(vec![]);
        }
        Ok(vec![
            AdvisorStats {
                advisor: "Laura Pérez".into(),
                assigned_leads: 120,
                enrollments: 31,
                conversion_rate: 0.258,
            },
            AdvisorStats {
                advisor: "Carlos Ramírez".into(),
                assigned_leads: 95,
                enrollments: 19,
                conversion_rate: 0.2,
            },
        ])
    }
}
