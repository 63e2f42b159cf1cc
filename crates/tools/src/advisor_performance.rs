//! Advisor performance tool — per-advisor lead and enrollment rollups.

use async_trait::async_trait;
use aula_core::error::ToolError;
use aula_core::message::TenantId;
use aula_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::services::EnrollmentReads;

pub struct AdvisorPerformanceTool {
    reads: Arc<dyn EnrollmentReads>,
}

impl AdvisorPerformanceTool {
    pub fn new(reads: Arc<dyn EnrollmentReads>) -> Self {
        Self { reads }
    }
}

#[async_trait]
impl Tool for AdvisorPerformanceTool {
    fn name(&self) -> &str {
        "advisor_performance"
    }

    fn description(&self) -> &str {
        "Get per-advisor performance: assigned leads, completed enrollments, and conversion rate. Use for questions about how the admissions team or a specific advisor is doing."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "advisor": {
                    "type": "string",
                    "description": "Optional advisor name to filter by"
                }
            }
        })
    }

    // Default Volatile: rollups shift with every new lead.

    async fn execute(
        &self,
        tenant: &TenantId,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let stats = self
            .reads
            .advisor_performance(tenant)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "advisor_performance".into(),
                reason: e.to_string(),
            })?;

        let filter = arguments["advisor"].as_str().map(str::to_lowercase);
        let matched: Vec<_> = stats
            .into_iter()
            .filter(|s| match &filter {
                Some(name) => s.advisor.to_lowercase().contains(name),
                None => true,
            })
            .collect();

        let output = if matched.is_empty() {
            "No advisor data available.".to_string()
        } else {
            matched
                .iter()
                .map(|s| {
                    format!(
                        "{}: {} leads, {} enrollments ({:.1}% conversion)",
                        s.advisor,
                        s.assigned_leads,
                        s.enrollments,
                        s.conversion_rate * 100.0
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output,
            data: Some(serde_json::json!({"advisors": matched})),
        })
    }
}
