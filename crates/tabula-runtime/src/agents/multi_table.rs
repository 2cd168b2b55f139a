//! Multi-table transform agent: named tables in, named tables out.

use async_trait::async_trait;
use tabula_core::{AgentKind, QueryInput, SuccessPayload, TableSet};
use tabula_llm::ToolSchema;
use tabula_sandbox::{LANGUAGE_REFERENCE, Sandbox};
use tracing::debug;

use super::{describe_tables, object_schema, run_script, string_property};
use crate::agent::{ToolCall, ToolContext, ToolHandler, ToolOutcome};
use crate::errors::RuntimeError;

/// Name of the multi-table tool.
pub const MULTI_TABLE_FUNCTION: &str = "transform_multiple_tables_script";

/// Turns `transform_multiple_tables_script` calls into sets of new tables.
#[derive(Clone, Copy, Debug, Default)]
pub struct MultiTableHandler {
    sandbox: Sandbox,
}

impl MultiTableHandler {
    /// Create a handler running scripts in `sandbox`.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

fn bound(input: &QueryInput) -> Result<(&TableSet, &[String]), RuntimeError> {
    match input {
        QueryInput::Tables {
            tables,
            output_table_names,
        } => Ok((tables, output_table_names.as_deref().unwrap_or_default())),
        _ => Err(RuntimeError::InvalidInput(
            "the multi-table agent needs a set of named tables".into(),
        )),
    }
}

#[async_trait]
impl ToolHandler for MultiTableHandler {
    fn kind(&self) -> AgentKind {
        AgentKind::MultiTableTransform
    }

    fn tools(&self) -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: MULTI_TABLE_FUNCTION.into(),
            description: "Transform several tables at once by running a table script that reads \
                          them from the `tables` dictionary and assigns a dictionary of new \
                          tables to `result_tables`."
                .into(),
            parameters: object_schema(&[(
                "code",
                string_property(
                    "Table script defining `result_tables`, a dictionary from descriptive table \
                     names to tables. Inputs are read with (get tables \"name\").",
                ),
            )]),
        }]
    }

    fn instructions(&self, input: &QueryInput) -> Result<String, RuntimeError> {
        let (tables, outputs) = bound(input)?;
        let expected = if outputs.is_empty() {
            "Use short, descriptive snake_case names as the keys of `result_tables`.".to_string()
        } else {
            format!(
                "The user expects these output tables; use exactly these names as the keys of \
                 `result_tables`: {}.",
                outputs
                    .iter()
                    .map(|name| format!("'{name}'"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        Ok(format!(
            "You are a data transformation assistant specialized in operations across several \
             tables: joins, concatenation, cross-table calculations and reconciliation. You know \
             the structure of the tables, not their content.\n\n\
             # Available tables\n{}\n\n\
             # Expected output\n{expected}\n\n\
             All tables are available through the dictionary `tables`; read one with \
             (get tables \"name\") using the exact names above. Never modify an input table. \
             Assign a dictionary of the resulting tables to a variable named `result_tables`, \
             for example:\n\
             (def result_tables (dict \"merged\" (join (get tables \"orders\") (get tables \"customers\") :on \"customer_id\")))\n\n\
             Call the `{MULTI_TABLE_FUNCTION}` function only once. Only the operations below are \
             available.\n\n\
             {LANGUAGE_REFERENCE}",
            describe_tables(tables)
        ))
    }

    async fn handle(
        &self,
        call: &ToolCall,
        input: &QueryInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, RuntimeError> {
        if call.function_name != MULTI_TABLE_FUNCTION {
            return Ok(ToolOutcome::unknown_function(&call.function_name));
        }
        let code = call.str_arg("code");
        if code.trim().is_empty() {
            return Ok(ToolOutcome::validation("No code provided in function arguments"));
        }

        let (tables, _) = bound(input)?;
        ctx.emit_code(call, code).await?;
        let (sandbox, script, tables) = (self.sandbox, code.to_string(), tables.clone());
        match run_script(move || sandbox.transform_tables(&script, tables)).await? {
            Ok(tables) => {
                debug!(outputs = ?tables.keys().collect::<Vec<_>>(), "tables transformed");
                Ok(ToolOutcome::Success {
                    function_response: "Successfully transformed the multiple tables.".into(),
                    payload: SuccessPayload::MultiTableTransform {
                        tables,
                        code: code.to_string(),
                    },
                })
            }
            Err(e) => Ok(e.into()),
        }
    }
}
