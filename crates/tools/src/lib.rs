//! Domain tools for aula.
//!
//! A fixed, closed set of read-only queries over institutional data. Each
//! tool is tenant-scoped: the orchestrator supplies the authenticated tenant
//! id at execution time, and every read goes through the `EnrollmentReads`
//! service for exactly that tenant.

pub mod advisor_performance;
pub mod aggregate_statistics;
pub mod collections_aging;
pub mod fixture;
pub mod program_catalog;
pub mod services;
pub mod student_search;

use aula_core::tool::ToolRegistry;
use std::sync::Arc;

pub use fixture::FixtureReads;
pub use services::{
    AdvisorStats, AgingBucket, EnrollmentReads, ProgramInfo, RevenueSummary, ServiceError,
    StudentHit,
};

/// Create the standard tool registry wired to a read-service.
pub fn default_registry(reads: Arc<dyn EnrollmentReads>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(aggregate_statistics::AggregateStatisticsTool::new(
        reads.clone(),
    )));
    registry.register(Box::new(program_catalog::ProgramCatalogTool::new(
        reads.clone(),
    )));
    registry.register(Box::new(collections_aging::CollectionsAgingTool::new(
        reads.clone(),
    )));
    registry.register(Box::new(student_search::StudentSearchTool::new(
        reads.clone(),
    )));
    registry.register(Box::new(advisor_performance::AdvisorPerformanceTool::new(
        reads,
    )));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_core::tool::ToolVolatility;

    #[test]
    fn registry_has_all_five_tools() {
        let registry = default_registry(Arc::new(FixtureReads::demo("t1")));
        let mut names = registry.names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "advisor_performance",
                "aggregate_statistics",
                "collections_aging",
                "program_catalog",
                "student_search",
            ]
        );
    }

    #[test]
    fn volatility_split_matches_cache_policy() {
        let registry = default_registry(Arc::new(FixtureReads::demo("t1")));

        for stable in ["aggregate_statistics", "program_catalog"] {
            assert_eq!(
                registry.get(stable).unwrap().volatility(),
                ToolVolatility::Stable,
                "{stable} should be cache-eligible"
            );
        }
        for volatile in ["collections_aging", "student_search", "advisor_performance"] {
            assert_eq!(
                registry.get(volatile).unwrap().volatility(),
                ToolVolatility::Volatile,
                "{volatile} should disqualify caching"
            );
        }
    }
}
