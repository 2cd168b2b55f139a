//! The orchestrator's three delegation tools.
//!
//! A raw [`ToolCall`] is parsed into a [`TableAgentTool`], then resolved
//! against the tables available for the turn into a [`Delegation`]: which
//! agent to start and with which query. Every rejection is a
//! [`ToolOutcome::Failure`] fed back to the LLM.

use std::sync::Arc;

use serde_json::json;
use tabula_core::{AgentKind, QueryInput, Table, TableSet};
use tabula_llm::ToolSchema;

use crate::agent::{ToolCall, ToolOutcome, UserQuery};

/// Delegate a chart to the plot agent.
pub const GENERATE_PLOT: &str = "generate_plot";
/// Delegate a single-table change to the transform agent.
pub const TRANSFORM_TABLE: &str = "transform_table";
/// Delegate a cross-table change to the multi-table agent.
pub const TRANSFORM_MULTIPLE_TABLES: &str = "transform_multiple_tables";

/// A parsed orchestrator tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableAgentTool {
    /// `generate_plot`.
    GeneratePlot {
        /// Table to plot.
        table_name: String,
        /// Request forwarded to the plot agent.
        user_request: String,
    },
    /// `transform_table`.
    TransformTable {
        /// Table to transform.
        table_name: String,
        /// Name for the new table.
        output_table_name: String,
        /// Request forwarded to the transform agent.
        user_request: String,
    },
    /// `transform_multiple_tables`.
    TransformMultipleTables {
        /// Tables to read.
        table_names: Vec<String>,
        /// Names for the new tables.
        output_table_names: Vec<String>,
        /// Request forwarded to the multi-table agent.
        user_request: String,
    },
}

/// A resolved tool call: the agent to start and its query.
#[derive(Clone, Debug, PartialEq)]
pub struct Delegation {
    /// Agent to start.
    pub kind: AgentKind,
    /// Query for that agent, with only the tables it needs.
    pub query: UserQuery,
}

fn trimmed_list(call: &ToolCall, name: &str) -> Vec<String> {
    call.str_list_arg(name)
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn available(tables: &TableSet) -> String {
    tables.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn lookup<'t>(tables: &'t TableSet, table_name: &str) -> Result<&'t Arc<Table>, ToolOutcome> {
    if table_name.is_empty() {
        return Err(ToolOutcome::validation(
            "No table name provided in function arguments.",
        ));
    }
    tables.get(table_name).ok_or_else(|| {
        ToolOutcome::validation(format!(
            "Table '{table_name}' not found. Available tables: {}",
            available(tables)
        ))
    })
}

impl TableAgentTool {
    /// Parse a call. Fails on a missing request or an undeclared function.
    pub fn parse(call: &ToolCall) -> Result<Self, ToolOutcome> {
        let user_request = call.str_arg("user_request").trim();
        if user_request.is_empty() {
            return Err(ToolOutcome::validation(
                "No user request provided in function arguments.",
            ));
        }
        let user_request = user_request.to_string();
        let table_name = call.str_arg("table_name").trim().to_string();

        match call.function_name.as_str() {
            GENERATE_PLOT => Ok(Self::GeneratePlot {
                table_name,
                user_request,
            }),
            TRANSFORM_TABLE => Ok(Self::TransformTable {
                table_name,
                output_table_name: call.str_arg("output_table_name").trim().to_string(),
                user_request,
            }),
            TRANSFORM_MULTIPLE_TABLES => Ok(Self::TransformMultipleTables {
                table_names: trimmed_list(call, "table_names"),
                output_table_names: trimmed_list(call, "output_table_names"),
                user_request,
            }),
            other => Err(ToolOutcome::unknown_function(other)),
        }
    }

    /// Agent this tool delegates to.
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::GeneratePlot { .. } => AgentKind::Plot,
            Self::TransformTable { .. } => AgentKind::TableTransform,
            Self::TransformMultipleTables { .. } => AgentKind::MultiTableTransform,
        }
    }

    /// Resolve table names against `tables`.
    pub fn resolve(self, tables: &TableSet) -> Result<Delegation, ToolOutcome> {
        let kind = self.kind();
        let query = match self {
            Self::GeneratePlot {
                table_name,
                user_request,
            } => {
                let table = lookup(tables, &table_name)?;
                UserQuery::new(
                    user_request,
                    QueryInput::Table {
                        table: Arc::clone(table),
                        table_key: Some(table_name),
                    },
                )
            }
            Self::TransformTable {
                table_name,
                output_table_name,
                user_request,
            } => {
                let table = lookup(tables, &table_name)?;
                if output_table_name.is_empty() {
                    return Err(ToolOutcome::validation(
                        "No output_table_name provided in function arguments.",
                    ));
                }
                UserQuery::new(
                    user_request,
                    QueryInput::TableTransform {
                        table: Arc::clone(table),
                        table_name: Some(table_name),
                        output_table_name: Some(output_table_name),
                    },
                )
            }
            Self::TransformMultipleTables {
                table_names,
                output_table_names,
                user_request,
            } => {
                if table_names.is_empty() {
                    return Err(ToolOutcome::validation(
                        "No table_names provided in function arguments.",
                    ));
                }
                if output_table_names.is_empty() {
                    return Err(ToolOutcome::validation(
                        "No output_table_names provided in function arguments.",
                    ));
                }
                let missing: Vec<&str> = table_names
                    .iter()
                    .filter(|name| !tables.contains_key(name.as_str()))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(ToolOutcome::validation(format!(
                        "Tables not found: {}. Available tables: {}",
                        missing.join(", "),
                        available(tables)
                    )));
                }
                let selected: TableSet = table_names
                    .iter()
                    .filter_map(|name| tables.get(name).map(|t| (name.clone(), Arc::clone(t))))
                    .collect();
                UserQuery::new(
                    user_request,
                    QueryInput::Tables {
                        tables: selected,
                        output_table_names: Some(output_table_names),
                    },
                )
            }
        };
        Ok(Delegation { kind, query })
    }
}

/// Declared orchestrator tools.
pub fn table_agent_tools() -> Vec<ToolSchema> {
    let strict = |properties: serde_json::Value, required: &[&str]| {
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    };
    let table_name = json!({
        "type": "string",
        "description": "Exact name of the table to use. Must match one of the available tables.",
    });
    let user_request = |what: &str| {
        json!({
            "type": "string",
            "description": format!("The user's request for {what}, passed on to the specialized agent."),
        })
    };

    vec![
        ToolSchema {
            name: GENERATE_PLOT.into(),
            description: "Generate a chart or other visualization of a SINGLE table.".into(),
            parameters: strict(
                json!({
                    "table_name": table_name,
                    "user_request": user_request("data visualization"),
                }),
                &["table_name", "user_request"],
            ),
        },
        ToolSchema {
            name: TRANSFORM_TABLE.into(),
            description: "Clean, filter, reshape or compute on a SINGLE table, producing a new \
                          named table."
                .into(),
            parameters: strict(
                json!({
                    "table_name": table_name,
                    "output_table_name": {
                        "type": "string",
                        "description": "Unique name for the new table. Must not clash with existing table names.",
                    },
                    "user_request": user_request("data transformation"),
                }),
                &["table_name", "output_table_name", "user_request"],
            ),
        },
        ToolSchema {
            name: TRANSFORM_MULTIPLE_TABLES.into(),
            description: "Merge, join, compare or otherwise combine SEVERAL tables, producing \
                          new named tables."
                .into(),
            parameters: strict(
                json!({
                    "table_names": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Names of the tables to use. All must be available.",
                    },
                    "output_table_names": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Unique names for the new tables.",
                    },
                    "user_request": user_request("a multi-table transformation"),
                }),
                &["table_names", "output_table_names", "user_request"],
            ),
        },
    ]
}
