//! Collections aging tool — receivables bucketed by days overdue.

use async_trait::async_trait;
use aula_core::error::ToolError;
use aula_core::message::TenantId;
use aula_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::services::EnrollmentReads;

pub struct CollectionsAgingTool {
    reads: Arc<dyn EnrollmentReads>,
}

impl CollectionsAgingTool {
    pub fn new(reads: Arc<dyn EnrollmentReads>) -> Self {
        Self { reads }
    }
}

#[async_trait]
impl Tool for CollectionsAgingTool {
    fn name(&self) -> &str {
        "collections_aging"
    }

    fn description(&self) -> &str {
        "Get the accounts-receivable aging report: how many accounts are overdue and how much is outstanding in each bucket (0-30, 31-60, 61-90, 90+ days). Use for questions about cartera vencida, overdue balances, or collections."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    // Default Volatile: figures move with every payment received.

    async fn execute(
        &self,
        tenant: &TenantId,
        _arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let buckets = self
            .reads
            .aging_report(tenant)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "collections_aging".into(),
                reason: e.to_string(),
            })?;

        let total: f64 = buckets.iter().map(|b| b.outstanding_total).sum();
        let mut lines: Vec<String> = buckets
            .iter()
            .map(|b| {
                format!(
                    "{} days: {} accounts, {:.2} outstanding",
                    b.bucket, b.account_count, b.outstanding_total
                )
            })
            .collect();
        lines.push(format!("Total outstanding: {total:.2}"));

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: lines.join("\n"),
            data: Some(serde_json::json!({
                "buckets": buckets,
                "total_outstanding": total,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureReads;
    use aula_core::tool::ToolVolatility;

    #[tokio::test]
    async fn reports_buckets_and_total() {
        let tool = CollectionsAgingTool::new(Arc::new(FixtureReads::demo("t1")));
        let result = tool
            .execute(&TenantId::new("t1"), serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("0-30 days: 58 accounts"));
        assert!(result.output.contains("Total outstanding: 336550.00"));
        let data = result.data.unwrap();
        assert_eq!(data["buckets"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn is_volatile() {
        let tool = CollectionsAgingTool::new(Arc::new(FixtureReads::demo("t1")));
        assert_eq!(tool.volatility(), ToolVolatility::Volatile);
    }
}
