//! Student search tool — fuzzy lookup by name fragment.
//!
//! Matching is diacritic-insensitive and tolerates partial names: a query
//! scores by substring containment first, then by word-level overlap.

use async_trait::async_trait;
use aula_core::error::ToolError;
use aula_core::message::TenantId;
use aula_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::services::{EnrollmentReads, StudentHit};

const DEFAULT_LIMIT: usize = 5;

pub struct StudentSearchTool {
    reads: Arc<dyn EnrollmentReads>,
}

impl StudentSearchTool {
    pub fn new(reads: Arc<dyn EnrollmentReads>) -> Self {
        Self { reads }
    }
}

/// Lowercase and strip Spanish diacritics for comparison.
fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Score a candidate name against the folded query. 0.0 means no match.
fn score(query: &str, name: &str) -> f32 {
    let name = fold(name);
    if name.contains(query) {
        return 1.0;
    }
    let query_words: Vec<&str> = query.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }
    let matched = query_words
        .iter()
        .filter(|w| name.split_whitespace().any(|nw| nw.starts_with(*w)))
        .count();
    matched as f32 / query_words.len() as f32
}

#[async_trait]
impl Tool for StudentSearchTool {
    fn name(&self) -> &str {
        "student_search"
    }

    fn description(&self) -> &str {
        "Fuzzy search for a student by (partial) name. Returns id, full name, program, status, and outstanding balance for the closest matches."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Name or name fragment to search for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum matches to return (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    // Default Volatile: results are per-student and balance-sensitive.

    async fn execute(
        &self,
        tenant: &TenantId,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let limit = arguments["limit"]
            .as_u64()
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let students = self
            .reads
            .students(tenant)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "student_search".into(),
                reason: e.to_string(),
            })?;

        let folded = fold(query);
        let mut scored: Vec<(f32, StudentHit)> = students
            .into_iter()
            .filter_map(|s| {
                let sc = score(&folded, &s.full_name);
                (sc > 0.0).then_some((sc, s))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let hits: Vec<StudentHit> = scored.into_iter().map(|(_, s)| s).collect();
        let output = if hits.is_empty() {
            format!("No students matched '{query}'.")
        } else {
            hits.iter()
                .map(|s| {
                    format!(
                        "{} — {} ({}, {}, balance {:.2})",
                        s.id, s.full_name, s.program, s.status, s.balance
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output,
            data: Some(serde_json::json!({"matches": hits})),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureReads;

    fn tool() -> StudentSearchTool {
        StudentSearchTool::new(Arc::new(FixtureReads::demo("t1")))
    }

    #[tokio::test]
    async fn exact_fragment_matches() {
        let result = tool()
            .execute(&TenantId::new("t1"), serde_json::json!({"query": "gonzález"}))
            .await
            .unwrap();
        assert!(result.output.contains("María Fernanda González"));
    }

    #[tokio::test]
    async fn diacritics_are_ignored() {
        let result = tool()
            .execute(&TenantId::new("t1"), serde_json::json!({"query": "gonzalez"}))
            .await
            .unwrap();
        assert!(result.output.contains("María Fernanda González"));
    }

    #[tokio::test]
    async fn partial_words_match() {
        let result = tool()
            .execute(&TenantId::new("t1"), serde_json::json!({"query": "jose hern"}))
            .await
            .unwrap();
        assert!(result.output.contains("José Luis Hernández"));
    }

    #[tokio::test]
    async fn no_match_reports_cleanly() {
        let result = tool()
            .execute(&TenantId::new("t1"), serde_json::json!({"query": "zzzz"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("No students matched"));
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let err = tool()
            .execute(&TenantId::new("t1"), serde_json::json!({"query": "  "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn other_tenant_sees_nothing() {
        let result = tool()
            .execute(&TenantId::new("t2"), serde_json::json!({"query": "gonzalez"}))
            .await
            .unwrap();
        assert!(result.output.contains("No students matched"));
    }
}
