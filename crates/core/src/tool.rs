//! Tool trait — the closed set of domain functions the model may invoke.
//!
//! Tools are read-only queries against institutional data: enrollment
//! statistics, the program catalog, collections reports, student lookup,
//! advisor rollups. Execution is tenant-isolated: the orchestrator passes the
//! authenticated `TenantId` explicitly, and a tool must never read another
//! tenant's data regardless of what arguments the model supplies.

use crate::error::ToolError;
use crate::message::TenantId;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// Text rendering of the result, fed back to the model
    pub output: String,

    /// Structured data for the invocation log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// How volatile a tool's results are — drives response cacheability.
///
/// `Stable` tools read tenant-wide, slowly-changing data (program catalog,
/// aggregate statistics). `Volatile` tools read per-student or time-sensitive
/// data; any turn that used one is excluded from the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolVolatility {
    Stable,
    Volatile,
}

/// The core Tool trait.
///
/// Each domain tool implements this trait and is registered in the
/// `ToolRegistry`. Dispatch is always by table lookup on the fixed name —
/// never dynamic evaluation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "student_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Result volatility, for the cacheability predicate.
    fn volatility(&self) -> ToolVolatility {
        ToolVolatility::Volatile
    }

    /// Execute the tool for the given tenant with the given arguments.
    async fn execute(
        &self,
        tenant: &TenantId,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools — a closed lookup table.
///
/// The orchestrator uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
/// 3. Check volatility for the cacheability predicate
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool call for a tenant. An unknown tool name or an execution
    /// failure is folded into a `ToolResult` with `success = false` so the
    /// model can report honestly instead of the turn aborting.
    pub async fn execute(&self, tenant: &TenantId, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult {
                call_id: call.id.clone(),
                success: false,
                output: format!("Error: unknown tool '{}'", call.name),
                data: None,
            };
        };

        match tool.execute(tenant, call.arguments.clone()).await {
            Ok(mut result) => {
                result.call_id = call.id.clone();
                result
            }
            Err(e) => ToolResult {
                call_id: call.id.clone(),
                success: false,
                output: format!("Error: {e}"),
                data: None,
            },
        }
    }

    /// Whether every tool in `names` has stable (cacheable) results.
    /// Unknown names count as volatile.
    pub fn all_stable(&self, names: &[String]) -> bool {
        names.iter().all(|n| {
            self.tools
                .get(n)
                .is_some_and(|t| t.volatility() == ToolVolatility::Stable)
        })
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
