//! Specialized table agents.
//!
//! Each exposes exactly one tool whose arguments are a table script plus
//! agent-specific metadata, runs the script in the [`Sandbox`], and wraps the
//! produced table(s) or figure in a `function_success` event. Instructions
//! describe table structure only, never cell values.

pub mod multi_table;
pub mod plot;
pub mod transform;

pub use multi_table::MultiTableHandler;
pub use plot::PlotHandler;
pub use transform::TransformHandler;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tabula_core::{AgentKind, QueryInput, TableSet};
use tabula_llm::{Provider, ToolSchema};
use tabula_sandbox::{Sandbox, SandboxError};

use crate::agent::{AgentConfig, FunctionAgent, ToolCall, ToolContext, ToolHandler, ToolOutcome};
use crate::errors::RuntimeError;

/// Plot agent.
pub type PlotAgent = FunctionAgent<PlotHandler>;
/// Single-table transform agent.
pub type TransformAgent = FunctionAgent<TransformHandler>;
/// Multi-table transform agent.
pub type MultiTableAgent = FunctionAgent<MultiTableHandler>;

/// The closed set of agents the orchestrator can delegate to.
#[derive(Clone, Debug)]
pub enum Specialist {
    /// See [`PlotHandler`].
    Plot(PlotHandler),
    /// See [`TransformHandler`].
    Transform(TransformHandler),
    /// See [`MultiTableHandler`].
    MultiTable(MultiTableHandler),
}

impl Specialist {
    /// The handler for `kind`, or `None` for the orchestrator itself.
    pub fn for_kind(kind: AgentKind, sandbox: Sandbox) -> Option<Self> {
        match kind {
            AgentKind::Plot => Some(Self::Plot(PlotHandler::new(sandbox))),
            AgentKind::TableTransform => Some(Self::Transform(TransformHandler::new(sandbox))),
            AgentKind::MultiTableTransform => {
                Some(Self::MultiTable(MultiTableHandler::new(sandbox)))
            }
            AgentKind::TableAgent => None,
        }
    }

    /// A sub-agent running this handler.
    pub fn into_agent(
        self,
        id: tabula_core::AgentId,
        provider: Arc<dyn Provider>,
        config: AgentConfig,
    ) -> FunctionAgent<Self> {
        FunctionAgent::with_id(id, provider, config, self)
    }

    fn inner(&self) -> &dyn ToolHandler {
        match self {
            Self::Plot(h) => h,
            Self::Transform(h) => h,
            Self::MultiTable(h) => h,
        }
    }
}

#[async_trait]
impl ToolHandler for Specialist {
    fn kind(&self) -> AgentKind {
        self.inner().kind()
    }

    fn tools(&self) -> Vec<ToolSchema> {
        self.inner().tools()
    }

    fn instructions(&self, input: &QueryInput) -> Result<String, RuntimeError> {
        self.inner().instructions(input)
    }

    async fn handle(
        &self,
        call: &ToolCall,
        input: &QueryInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, RuntimeError> {
        self.inner().handle(call, input, ctx).await
    }
}

/// Run a sandbox script on tokio's blocking pool, off the async workers.
async fn run_script<T, F>(script: F) -> Result<Result<T, SandboxError>, RuntimeError>
where
    F: FnOnce() -> Result<T, SandboxError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(script)
        .await
        .map_err(|e| RuntimeError::Internal(format!("script task failed: {e}")))
}

/// JSON schema for an object with string properties, all required.
fn object_schema(properties: &[(&str, Value)]) -> Value {
    let required: Vec<&str> = properties.iter().map(|(name, _)| *name).collect();
    let properties: serde_json::Map<String, Value> = properties
        .iter()
        .map(|(name, schema)| ((*name).to_string(), schema.clone()))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn string_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

/// Structural description of every table in `tables`.
pub(crate) fn describe_tables(tables: &TableSet) -> String {
    if tables.is_empty() {
        return "No tables are available.".to_string();
    }
    tables
        .iter()
        .map(|(name, table)| format!("## Table '{name}'\n{}", table.describe()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabula_core::{Cell, Column, Table};

    #[test]
    fn schema_requires_every_property() {
        let schema = object_schema(&[
            ("code", string_property("script")),
            ("plot_name", string_property("title")),
        ]);
        assert_eq!(schema["required"], json!(["code", "plot_name"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["plot_name"]["type"], "string");
    }

    #[tokio::test]
    async fn scripts_run_off_the_async_worker() {
        let worker = std::thread::current().id();
        let ran_on = run_script(|| Ok::<_, SandboxError>(std::thread::current().id()))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(ran_on, worker);

        let err = run_script(|| Sandbox::default().transform_tables("(def result_tables 1)", TableSet::new()))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, SandboxError::Output { .. }), "{err:?}");
    }

    #[test]
    fn table_descriptions_never_include_values() {
        let table = Table::new(vec![Column::new(
            "secret",
            vec![Cell::from("hunter2"), Cell::Null],
        )])
        .unwrap();
        let mut tables = TableSet::new();
        let _ = tables.insert("users".into(), Arc::new(table));
        let text = describe_tables(&tables);
        assert!(text.contains("## Table 'users'"));
        assert!(text.contains("'secret'"));
        assert!(!text.contains("hunter2"));
        assert_eq!(describe_tables(&TableSet::new()), "No tables are available.");
    }

    #[test]
    fn specialist_for_each_sub_agent_kind() {
        let sandbox = Sandbox::default();
        assert_eq!(
            Specialist::for_kind(AgentKind::Plot, sandbox).map(|s| s.kind()),
            Some(AgentKind::Plot)
        );
        assert_eq!(
            Specialist::for_kind(AgentKind::MultiTableTransform, sandbox).map(|s| s.tools()[0].name.clone()),
            Some("transform_multiple_tables_script".to_string())
        );
        assert!(Specialist::for_kind(AgentKind::TableAgent, sandbox).is_none());
    }
}
