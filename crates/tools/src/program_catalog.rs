//! Program catalog tool — lookup over the tenant's academic offerings.

use async_trait::async_trait;
use aula_core::error::ToolError;
use aula_core::message::TenantId;
use aula_core::tool::{Tool, ToolResult, ToolVolatility};
use std::sync::Arc;

use crate::services::EnrollmentReads;

pub struct ProgramCatalogTool {
    reads: Arc<dyn EnrollmentReads>,
}

impl ProgramCatalogTool {
    pub fn new(reads: Arc<dyn EnrollmentReads>) -> Self {
        Self { reads }
    }
}

#[async_trait]
impl Tool for ProgramCatalogTool {
    fn name(&self) -> &str {
        "program_catalog"
    }

    fn description(&self) -> &str {
        "List the institution's academic programs with modality, duration, tuition, and whether enrollment is open. Optionally filter by a name or code fragment."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Optional name or code fragment to filter by"
                }
            }
        })
    }

    fn volatility(&self) -> ToolVolatility {
        ToolVolatility::Stable
    }

    async fn execute(
        &self,
        tenant: &TenantId,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let programs = self
            .reads
            .programs(tenant)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "program_catalog".into(),
                reason: e.to_string(),
            })?;

        let filter = arguments["query"].as_str().map(str::to_lowercase);
        let matched: Vec<_> = programs
            .into_iter()
            .filter(|p| match &filter {
                Some(q) => {
                    p.name.to_lowercase().contains(q) || p.code.to_lowercase().contains(q)
                }
                None => true,
            })
            .collect();

        let output = if matched.is_empty() {
            "No programs matched.".to_string()
        } else {
            matched
                .iter()
                .map(|p| {
                    format!(
                        "{} — {} ({}, {} months, {:.2}/mo, enrollment {})",
                        p.code,
                        p.name,
                        p.modality,
                        p.duration_months,
                        p.tuition,
                        if p.enrollment_open { "open" } else { "closed" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output,
            data: Some(serde_json::json!({"programs": matched})),
        })
    }
}
