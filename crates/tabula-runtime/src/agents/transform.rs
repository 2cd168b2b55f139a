//! Single-table transform agent: one table in, one new named table out.

use std::sync::Arc;

use async_trait::async_trait;
use tabula_core::{AgentKind, QueryInput, SuccessPayload, Table};
use tabula_llm::ToolSchema;
use tabula_sandbox::{LANGUAGE_REFERENCE, Sandbox};
use tracing::debug;

use super::{object_schema, run_script, string_property};
use crate::agent::{ToolCall, ToolContext, ToolHandler, ToolOutcome};
use crate::errors::RuntimeError;

/// Name of the transform tool.
pub const TRANSFORM_FUNCTION: &str = "transform_table_script";

/// Turns `transform_table_script` calls into new tables.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformHandler {
    sandbox: Sandbox,
}

impl TransformHandler {
    /// Create a handler running scripts in `sandbox`.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

struct Bound<'a> {
    table: &'a Arc<Table>,
    table_name: Option<&'a str>,
    output_table_name: Option<&'a str>,
}

fn bound(input: &QueryInput) -> Result<Bound<'_>, RuntimeError> {
    match input {
        QueryInput::TableTransform {
            table,
            table_name,
            output_table_name,
        } => Ok(Bound {
            table,
            table_name: table_name.as_deref(),
            output_table_name: output_table_name.as_deref().filter(|n| !n.trim().is_empty()),
        }),
        _ => Err(RuntimeError::InvalidInput(
            "the transform agent needs exactly one table".into(),
        )),
    }
}

#[async_trait]
impl ToolHandler for TransformHandler {
    fn kind(&self) -> AgentKind {
        AgentKind::TableTransform
    }

    fn tools(&self) -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: TRANSFORM_FUNCTION.into(),
            description: "Transform the table `df` by running a table script that assigns the \
                          new table to `transformed_df`."
                .into(),
            parameters: object_schema(&[
                (
                    "code",
                    string_property(
                        "Table script defining `transformed_df`. The input table is available as `df`.",
                    ),
                ),
                (
                    "transformed_table_name",
                    string_property("Short, descriptive snake_case name for the new table."),
                ),
            ]),
        }]
    }

    fn instructions(&self, input: &QueryInput) -> Result<String, RuntimeError> {
        let bound = bound(input)?;
        let source = bound
            .table_name
            .map(|name| format!(" (known to the user as '{name}')"))
            .unwrap_or_default();
        let naming = match bound.output_table_name {
            Some(name) => format!("The new table will be registered as '{name}'."),
            None => "Choose a short, descriptive snake_case `transformed_table_name`.".to_string(),
        };
        Ok(format!(
            "You are a data transformation assistant. You transform a table by writing \
             table scripts.\n\n\
             The table is bound to the name `df`{source}. Its structure:\n{}\n\n\
             Call the `{TRANSFORM_FUNCTION}` function only once, with a script that assigns \
             the result to a variable named `transformed_df`. Never modify `df`; always build \
             a new table. {naming} Only the operations below are available.\n\n\
             {LANGUAGE_REFERENCE}",
            bound.table.describe()
        ))
    }

    async fn handle(
        &self,
        call: &ToolCall,
        input: &QueryInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, RuntimeError> {
        if call.function_name != TRANSFORM_FUNCTION {
            return Ok(ToolOutcome::unknown_function(&call.function_name));
        }
        let code = call.str_arg("code");
        if code.trim().is_empty() {
            return Ok(ToolOutcome::validation("No code provided in function arguments"));
        }

        let bound = bound(input)?;
        ctx.emit_code(call, code).await?;

        let argument_name = call.str_arg("transformed_table_name").trim();
        let table_name = match bound.output_table_name {
            Some(name) => name,
            None if !argument_name.is_empty() => argument_name,
            None => {
                return Ok(ToolOutcome::validation(
                    "No transformed_table_name provided in function arguments",
                ));
            }
        };

        let (sandbox, script, table) = (self.sandbox, code.to_string(), Arc::clone(bound.table));
        match run_script(move || sandbox.transform_table(&script, table)).await? {
            Ok(table) => {
                debug!(
                    table_name,
                    rows = table.nrows(),
                    columns = table.ncols(),
                    "table transformed"
                );
                Ok(ToolOutcome::Success {
                    function_response: "Successfully transformed the table.".into(),
                    payload: SuccessPayload::TableTransform {
                        table_name: table_name.to_string(),
                        table,
                        code: code.to_string(),
                    },
                })
            }
            Err(e) => Ok(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, FunctionAgent, UserQuery};
    use assert_matches::assert_matches;
    use serde_json::json;
    use tabula_core::{AgentEvent, Cell, Column, EventKind, FunctionErrorKind};
    use tabula_llm::testing::{ScriptedProvider, ScriptedTurn};

    fn prices() -> Arc<Table> {
        Arc::new(
            Table::new(vec![
                Column::new("item", vec![Cell::from("tea"), Cell::from("cake")]),
                Column::new("price", vec![Cell::from(3_i64), Cell::from(5_i64)]),
            ])
            .unwrap(),
        )
    }

    fn input(output: Option<&str>) -> QueryInput {
        QueryInput::TableTransform {
            table: prices(),
            table_name: Some("prices".into()),
            output_table_name: output.map(str::to_string),
        }
    }

    const DOUBLE: &str = r#"(def transformed_df (with-column df "price" (* (col df "price") 2)))"#;

    async fn run(output: Option<&str>, turns: Vec<ScriptedTurn>) -> Vec<AgentEvent> {
        let provider = Arc::new(ScriptedProvider::new(turns));
        let mut agent = FunctionAgent::new(
            provider,
            AgentConfig::default().for_sub_agent(),
            TransformHandler::default(),
        );
        let mut out = Vec::new();
        let _ = agent
            .run(UserQuery::new("double the prices", input(output)), &mut out)
            .await
            .unwrap();
        out
    }

    fn success(out: &[AgentEvent]) -> Option<&SuccessPayload> {
        out.iter().find_map(|e| match e {
            AgentEvent::FunctionSuccess { payload, .. } => Some(payload),
            _ => None,
        })
    }

    #[tokio::test]
    async fn produces_a_new_named_table() {
        let out = run(
            None,
            vec![ScriptedTurn::function_call(
                TRANSFORM_FUNCTION,
                &json!({"code": DOUBLE, "transformed_table_name": "doubled"}),
            )],
        )
        .await;

        assert_matches!(
            success(&out),
            Some(SuccessPayload::TableTransform { table_name, table, .. })
                if table_name == "doubled"
                    && table.column("price").unwrap().values == vec![Cell::Int(6), Cell::Int(10)]
        );
        // Input untouched.
        assert_eq!(
            prices().column("price").unwrap().values,
            vec![Cell::Int(3), Cell::Int(5)]
        );
    }

    #[tokio::test]
    async fn query_output_name_wins_over_argument() {
        let out = run(
            Some("prices_x2"),
            vec![ScriptedTurn::function_call(
                TRANSFORM_FUNCTION,
                &json!({"code": DOUBLE, "transformed_table_name": "ignored"}),
            )],
        )
        .await;

        assert_matches!(
            success(&out),
            Some(SuccessPayload::TableTransform { table_name, .. }) if table_name == "prices_x2"
        );
    }

    #[tokio::test]
    async fn missing_name_is_reported_after_the_code_event() {
        let out = run(
            None,
            vec![
                ScriptedTurn::function_call(TRANSFORM_FUNCTION, &json!({"code": DOUBLE})),
                ScriptedTurn::text("sorry"),
            ],
        )
        .await;

        let kinds: Vec<EventKind> = out.iter().map(AgentEvent::kind).collect();
        let code = kinds.iter().position(|k| *k == EventKind::Code).unwrap();
        let error = kinds.iter().position(|k| *k == EventKind::FunctionError).unwrap();
        assert!(code < error);
        assert_matches!(
            &out[error],
            AgentEvent::FunctionError { kind: FunctionErrorKind::Validation, message, .. }
                if message == "No transformed_table_name provided in function arguments"
        );
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_running() {
        let out = run(
            None,
            vec![
                ScriptedTurn::function_call(
                    TRANSFORM_FUNCTION,
                    &json!({"code": "  ", "transformed_table_name": "x"}),
                ),
                ScriptedTurn::text("sorry"),
            ],
        )
        .await;

        assert!(out.iter().all(|e| e.kind() != EventKind::Code));
        assert!(out.iter().any(|e| matches!(
            e,
            AgentEvent::FunctionError { message, .. } if message == "No code provided in function arguments"
        )));
    }

    #[tokio::test]
    async fn same_script_same_table() {
        let call = || {
            ScriptedTurn::function_call(
                TRANSFORM_FUNCTION,
                &json!({"code": DOUBLE, "transformed_table_name": "doubled"}),
            )
        };
        let first = run(None, vec![call()]).await;
        let second = run(None, vec![call()]).await;
        let csv = |out: &[AgentEvent]| match success(out) {
            Some(SuccessPayload::TableTransform { table, .. }) => table.to_csv_string().unwrap(),
            other => panic!("unexpected payload: {other:?}"),
        };
        assert_eq!(csv(&first), csv(&second));
    }

    #[test]
    fn instructions_mention_fixed_output_name() {
        let text = TransformHandler::default()
            .instructions(&input(Some("prices_x2")))
            .unwrap();
        assert!(text.contains("registered as 'prices_x2'"));
        assert!(text.contains("known to the user as 'prices'"));
        assert!(!text.contains("cake"));
    }
}
