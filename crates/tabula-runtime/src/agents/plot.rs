//! Plot agent: one table in, one figure out.

use std::sync::Arc;

use async_trait::async_trait;
use tabula_core::{AgentKind, QueryInput, SuccessPayload, Table};
use tabula_llm::ToolSchema;
use tabula_sandbox::{LANGUAGE_REFERENCE, Sandbox};
use tracing::debug;

use super::{object_schema, run_script, string_property};
use crate::agent::{ToolCall, ToolContext, ToolHandler, ToolOutcome};
use crate::errors::RuntimeError;

/// Name of the plot tool.
pub const PLOT_FUNCTION: &str = "generate_plot_figure";

/// Turns `generate_plot_figure` calls into figures.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlotHandler {
    sandbox: Sandbox,
}

impl PlotHandler {
    /// Create a handler running scripts in `sandbox`.
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

fn bound_table(input: &QueryInput) -> Result<&Arc<Table>, RuntimeError> {
    match input {
        QueryInput::Table { table, .. } => Ok(table),
        _ => Err(RuntimeError::InvalidInput(
            "the plot agent needs exactly one table".into(),
        )),
    }
}

#[async_trait]
impl ToolHandler for PlotHandler {
    fn kind(&self) -> AgentKind {
        AgentKind::Plot
    }

    fn tools(&self) -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: PLOT_FUNCTION.into(),
            description: "Generate a Plotly figure from the table `df` by running a table script \
                          that assigns the figure to `fig`."
                .into(),
            parameters: object_schema(&[
                (
                    "code",
                    string_property(
                        "Table script defining `fig`. The input table is available as `df`.",
                    ),
                ),
                ("plot_name", string_property("Short, human-readable title of the plot.")),
            ]),
        }]
    }

    fn instructions(&self, input: &QueryInput) -> Result<String, RuntimeError> {
        let table = bound_table(input)?;
        Ok(format!(
            "You are a data visualization assistant. You create Plotly figures from a table \
             by writing table scripts.\n\n\
             The table is bound to the name `df`. Its structure:\n{}\n\n\
             Call the `{PLOT_FUNCTION}` function only once, with a script that assigns the \
             finished figure to a variable named `fig`, and a short `plot_name`. Give the \
             figure a title and axis labels. Only the operations below are available.\n\n\
             {LANGUAGE_REFERENCE}",
            table.describe()
        ))
    }

    async fn handle(
        &self,
        call: &ToolCall,
        input: &QueryInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, RuntimeError> {
        if call.function_name != PLOT_FUNCTION {
            return Ok(ToolOutcome::unknown_function(&call.function_name));
        }
        let code = call.str_arg("code");
        if code.trim().is_empty() {
            return Ok(ToolOutcome::validation("No code provided in function arguments"));
        }
        let plot_name = call.str_arg("plot_name").trim();
        if plot_name.is_empty() {
            return Ok(ToolOutcome::validation(
                "No plot_name provided in function arguments",
            ));
        }

        let table = bound_table(input)?;
        ctx.emit_code(call, code).await?;
        let (sandbox, script, table) = (self.sandbox, code.to_string(), Arc::clone(table));
        match run_script(move || sandbox.plot(&script, table)).await? {
            Ok(figure) => {
                debug!(plot_name, traces = figure.data.len(), "plot generated");
                Ok(ToolOutcome::Success {
                    function_response: "Successfully generated the plot.".into(),
                    payload: SuccessPayload::Plot {
                        plot_name: plot_name.to_string(),
                        figure,
                        code: code.to_string(),
                    },
                })
            }
            Err(e) => Ok(e.into()),
        }
    }
}
