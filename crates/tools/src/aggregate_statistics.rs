//! Aggregate statistics tool — tenant-wide enrollment and revenue figures.

use async_trait::async_trait;
use aula_core::error::ToolError;
use aula_core::message::TenantId;
use aula_core::tool::{Tool, ToolResult, ToolVolatility};
use chrono::{Datelike, Utc};
use std::sync::Arc;

use crate::services::EnrollmentReads;

pub struct AggregateStatisticsTool {
    reads: Arc<dyn EnrollmentReads>,
}

impl AggregateStatisticsTool {
    pub fn new(reads: Arc<dyn EnrollmentReads>) -> Self {
        Self { reads }
    }
}

#[async_trait]
impl Tool for AggregateStatisticsTool {
    fn name(&self) -> &str {
        "aggregate_statistics"
    }

    fn description(&self) -> &str {
        "Get tenant-wide aggregate figures: total revenue collected for a month, or the count of active students. Use for questions like 'how much have we collected this month?' or 'how many students are enrolled?'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "metric": {
                    "type": "string",
                    "enum": ["revenue", "enrollment"],
                    "description": "Which aggregate to compute"
                },
                "month": {
                    "type": "string",
                    "description": "Month in YYYY-MM form. Defaults to the current month. Only used for 'revenue'."
                }
            },
            "required": ["metric"]
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
        let metric = arguments["metric"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'metric' argument".into()))?;

        match metric {
            "revenue" => {
                let month = match arguments["month"].as_str() {
                    Some(m) => m.to_string(),
                    None => {
                        let now = Utc::now();
                        format!("{:04}-{:02}", now.year(), now.month())
                    }
                };
                let summary = self
                    .reads
                    .monthly_revenue(tenant, &month)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        tool_name: "aggregate_statistics".into(),
                        reason: e.to_string(),
                    })?;
                let output = format!(
                    "Revenue for {}: collected {:.2} {} across {} payments (invoiced {:.2})",
                    summary.month,
                    summary.collected_total,
                    summary.currency,
                    summary.payment_count,
                    summary.invoiced_total
                );
                Ok(ToolResult {
                    call_id: String::new(),
                    success: true,
                    output,
                    data: Some(serde_json::to_value(&summary).unwrap_or_default()),
                })
            }
            "enrollment" => {
                let count = self.reads.active_students(tenant).await.map_err(|e| {
                    ToolError::ExecutionFailed {
                        tool_name: "aggregate_statistics".into(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(ToolResult {
                    call_id: String::new(),
                    success: true,
                    output: format!("Active students: {count}"),
                    data: Some(serde_json::json!({"active_students": count})),
                })
            }
            other => Err(ToolError::InvalidArguments(format!(
                "Unknown metric '{other}', expected 'revenue' or 'enrollment'"
            ))),
        }
    }
}
