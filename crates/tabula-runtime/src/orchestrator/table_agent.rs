//! The Table Agent: routes each request to one specialized agent.
//!
//! Delegation runs the sub-agent inline, behind the orchestrator's own sink,
//! so sub-agent events land in the orchestrator's list and stream in the
//! order they were produced, nested inside the orchestrator's open turn.
//! Tables produced by earlier turns are found again by scanning that list.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tabula_core::{
    AgentEvent, AgentEventList, AgentId, AgentKind, Figure, FunctionErrorKind, QueryInput,
    SuccessPayload, TableSet,
};
use tabula_llm::{Provider, ToolSchema};
use tabula_sandbox::Sandbox;
use tracing::{info, instrument};

use super::tools::{Delegation, TableAgentTool, table_agent_tools};
use crate::agent::{
    Agent, AgentConfig, CallState, CallSummary, EventSink, FunctionAgent, ToolCall, ToolContext,
    ToolHandler, ToolOutcome, UserQuery,
};
use crate::agents::{Specialist, describe_tables};
use crate::errors::RuntimeError;

/// Appended to a sub-agent's success message before it is fed back.
const CONTINUE_HINT: &str = " Continue with next steps if needed.";

/// Tool handler of the orchestrator: validates a call, then runs the
/// matching sub-agent to completion.
pub struct TableAgentTools {
    provider: Arc<dyn Provider>,
    config: AgentConfig,
    sandbox: Sandbox,
}

impl TableAgentTools {
    /// Sub-agents use `provider`, `config` (without closing replies) and `sandbox`.
    pub fn new(provider: Arc<dyn Provider>, config: AgentConfig, sandbox: Sandbox) -> Self {
        Self {
            provider,
            config,
            sandbox,
        }
    }

    #[instrument(skip_all, fields(sub_agent_kind = %delegation.kind, call_id = %call.call_id))]
    async fn delegate(
        &self,
        call: &ToolCall,
        delegation: Delegation,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, RuntimeError> {
        let kind = delegation.kind;
        let Some(handler) = Specialist::for_kind(kind, self.sandbox) else {
            return Err(RuntimeError::Internal(format!(
                "no specialized agent for {kind}"
            )));
        };

        let sub_agent_id = AgentId::new();
        let parent_agent_id = ctx.agent_id.clone();
        ctx.emit(AgentEvent::CreateSubAgent {
            agent_id: sub_agent_id.clone(),
            parent_agent_id,
            response_id: call.response_id.clone(),
            call_id: call.call_id.clone(),
            sub_agent_kind: kind,
        })
        .await?;

        let mut sub_agent = handler.into_agent(
            sub_agent_id.clone(),
            Arc::clone(&self.provider),
            self.config.for_sub_agent(),
        );
        let summary = sub_agent.run(delegation.query, &mut *ctx.sink).await?;
        info!(
            %sub_agent_id,
            state = %summary.state,
            turns = summary.turns,
            "sub-agent finished"
        );
        Ok(sub_agent_outcome(kind, sub_agent_id, summary))
    }
}

fn sub_agent_outcome(kind: AgentKind, sub_agent_id: AgentId, summary: CallSummary) -> ToolOutcome {
    if let Some(response) = summary.last_success {
        return ToolOutcome::Success {
            function_response: format!("{response}{CONTINUE_HINT}"),
            payload: SuccessPayload::SubAgent { sub_agent_id },
        };
    }
    let message = match (summary.last_failure, summary.state) {
        (Some(failure), _) => failure,
        (None, CallState::Completed) => format!(
            "The {kind} agent finished without producing a result: {}",
            summary.final_text
        ),
        (None, state) => format!("The {kind} agent stopped ({state}) without producing a result."),
    };
    ToolOutcome::failure(FunctionErrorKind::SubAgent, message)
}

#[async_trait]
impl ToolHandler for TableAgentTools {
    fn kind(&self) -> AgentKind {
        AgentKind::TableAgent
    }

    fn tools(&self) -> Vec<ToolSchema> {
        table_agent_tools()
    }

    fn instructions(&self, input: &QueryInput) -> Result<String, RuntimeError> {
        match input {
            QueryInput::Tables { tables, .. } => Ok(instructions(tables)),
            _ => Err(RuntimeError::InvalidInput(
                "the table agent needs a set of named tables".into(),
            )),
        }
    }

    async fn handle(
        &self,
        call: &ToolCall,
        input: &QueryInput,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, RuntimeError> {
        let QueryInput::Tables { tables, .. } = input else {
            return Err(RuntimeError::InvalidInput(
                "the table agent needs a set of named tables".into(),
            ));
        };
        let delegation = match TableAgentTool::parse(call).and_then(|tool| tool.resolve(tables)) {
            Ok(delegation) => delegation,
            Err(rejection) => return Ok(rejection),
        };
        self.delegate(call, delegation, ctx).await
    }
}

fn instructions(tables: &TableSet) -> String {
    format!(
        "You are an assistant for table operations: data analysis, visualization and \
         manipulation. You know the structure of the tables, not their content.\n\n\
         # Available tables\n{}\n\n\
         You can help with three kinds of operations:\n\n\
         1. Data visualization: call `generate_plot` to create charts, graphs or plots, or to \
         show patterns and relationships. It works on ONE table.\n\
         2. Single-table transformation: call `transform_table` to clean or modify one table, \
         filter rows, select or derive columns, aggregate, reshape, or handle missing values. \
         It works on ONE table and needs a new `output_table_name`.\n\
         3. Multi-table transformation: call `transform_multiple_tables` to merge, join, \
         concatenate, compare or reconcile several tables. It needs `table_names` and \
         `output_table_names`.\n\n\
         Guidelines:\n\
         - Pick the function matching the user's intent and pass the relevant part of the \
         request as `user_request`.\n\
         - Use table names exactly as listed above.\n\
         - Call EXACTLY ONE function per response. Never call several functions at once.\n\
         - If the user asks for several operations in sequence, perform ONLY the first one. \
         The user sends a new message for the next step once it is done. Transformations \
         must finish before a plot can use their result.\n\
         - If the request is unclear, ask a clarifying question instead of guessing.\n\n\
         Examples:\n\
         - \"Show me a scatter plot of X vs Y\": `generate_plot` with the right table_name.\n\
         - \"Remove rows with missing values from sales_data\": `transform_table` with \
         table_name and output_table_name.\n\
         - \"Merge sales_data and inventory_data on product\": `transform_multiple_tables` \
         with table_names=['sales_data', 'inventory_data'] and output_table_names.\n\
         - \"Multiply all columns by 10, then make a scatter plot\": call ONLY \
         `transform_table` with the request \"Multiply all columns by 10\".\n\
         - \"Merge sales and inventory, then filter for low stock\": call ONLY \
         `transform_multiple_tables` with the request \"Merge sales and inventory\".",
        describe_tables(tables)
    )
}

/// Orchestrating agent over a set of named tables.
pub struct TableAgent {
    inner: FunctionAgent<TableAgentTools>,
    tables: TableSet,
}

impl TableAgent {
    /// Create an orchestrator over `tables`.
    pub fn new(
        provider: Arc<dyn Provider>,
        config: AgentConfig,
        sandbox: Sandbox,
        tables: TableSet,
    ) -> Self {
        let tools = TableAgentTools::new(Arc::clone(&provider), config.clone(), sandbox);
        Self {
            inner: FunctionAgent::new(provider, config, tools),
            tables,
        }
    }

    /// Agent id.
    pub fn id(&self) -> &AgentId {
        self.inner.id()
    }

    /// Everything emitted so far, sub-agent activity included.
    pub fn events(&self) -> &AgentEventList {
        self.inner.events()
    }

    /// Ask about the tables currently available.
    pub async fn query(
        &mut self,
        text: impl Into<String>,
        sink: &mut dyn EventSink,
    ) -> Result<CallSummary, RuntimeError> {
        let input = QueryInput::Tables {
            tables: self.available_tables(),
            output_table_names: None,
        };
        self.inner.run(UserQuery::new(text, input), sink).await
    }

    /// Tables produced by successful transforms, by name. A later table with
    /// the same name replaces an earlier one.
    pub fn output_tables(&self) -> TableSet {
        let mut tables = TableSet::new();
        for event in self.events() {
            let AgentEvent::FunctionSuccess { payload, .. } = event else {
                continue;
            };
            match payload {
                SuccessPayload::TableTransform {
                    table_name, table, ..
                } => {
                    let _ = tables.insert(table_name.clone(), Arc::clone(table));
                }
                SuccessPayload::MultiTableTransform { tables: produced, .. } => {
                    tables.extend(produced.iter().map(|(k, v)| (k.clone(), Arc::clone(v))));
                }
                SuccessPayload::Plot { .. } | SuccessPayload::SubAgent { .. } => {}
            }
        }
        tables
    }

    /// Generated figures, keyed `plot_0`, `plot_1`, ... in creation order.
    pub fn output_figures(&self) -> IndexMap<String, Arc<Figure>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AgentEvent::FunctionSuccess {
                    payload: SuccessPayload::Plot { figure, .. },
                    ..
                } => Some(Arc::clone(figure)),
                _ => None,
            })
            .enumerate()
            .map(|(i, figure)| (format!("plot_{i}"), figure))
            .collect()
    }

    /// Tables the user supplied: the initial set plus any table bound to one
    /// of this agent's queries that no transform produced.
    pub fn input_tables(&self) -> TableSet {
        let outputs = self.output_tables();
        let mut tables = self.tables.clone();
        for event in self.events() {
            if let AgentEvent::UserQuery {
                agent_id,
                input: QueryInput::Tables { tables: bound, .. },
                ..
            } = event
            {
                if agent_id != self.id() {
                    continue;
                }
                for (name, table) in bound {
                    if !outputs.contains_key(name) && !tables.contains_key(name) {
                        let _ = tables.insert(name.clone(), Arc::clone(table));
                    }
                }
            }
        }
        tables
    }

    /// Inputs plus outputs: what the next query can refer to.
    pub fn available_tables(&self) -> TableSet {
        let mut tables = self.input_tables();
        tables.extend(self.output_tables());
        tables
    }
}

#[async_trait]
impl Agent for TableAgent {
    fn id(&self) -> &AgentId {
        self.inner.id()
    }

    fn events(&self) -> &AgentEventList {
        self.inner.events()
    }

    async fn call(
        &mut self,
        query: UserQuery,
        sink: &mut dyn EventSink,
    ) -> Result<CallSummary, RuntimeError> {
        self.inner.run(query, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::call_agent;
    use crate::agents::plot::PLOT_FUNCTION;
    use crate::agents::transform::TRANSFORM_FUNCTION;
    use crate::orchestrator::tools::{GENERATE_PLOT, TRANSFORM_MULTIPLE_TABLES, TRANSFORM_TABLE};
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use serde_json::json;
    use tabula_core::{Cell, Column, EventKind, Table};
    use tabula_llm::testing::{ScriptedProvider, ScriptedTurn};

    fn measurements() -> TableSet {
        let table = Table::new(vec![
            Column::new("x", vec![Cell::from(1_i64), Cell::from(2_i64), Cell::from(3_i64)]),
            Column::new("y", vec![Cell::from(2_i64), Cell::from(4_i64), Cell::from(5_i64)]),
        ])
        .unwrap();
        let mut tables = TableSet::new();
        let _ = tables.insert("measurements".into(), Arc::new(table));
        tables
    }

    fn agent(provider: &Arc<ScriptedProvider>) -> TableAgent {
        TableAgent::new(
            provider.clone(),
            AgentConfig::default(),
            Sandbox::default(),
            measurements(),
        )
    }

    const SCATTER: &str = r#"(def fig (scatter (figure :title "y vs x") :x (col df "x") :y (col df "y")))"#;
    const TIMES_TEN: &str = r#"(def transformed_df (map-numeric df "*" 10))"#;

    fn count(events: &[AgentEvent], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind() == kind).count()
    }

    fn function_calls(events: &[AgentEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::FunctionCall { function_name, .. } => Some(function_name.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn plot_request_delegates_once() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::function_call(
                GENERATE_PLOT,
                &json!({"table_name": "measurements", "user_request": "plot x vs y"}),
            ),
            ScriptedTurn::function_call(PLOT_FUNCTION, &json!({"code": SCATTER, "plot_name": "y vs x"})),
            ScriptedTurn::text("Here is your scatter plot."),
        ]));
        let mut agent = agent(&provider);
        let mut out = Vec::new();
        let summary = agent.query("plot column x vs y", &mut out).await.unwrap();

        assert_eq!(summary.state, CallState::Completed);
        assert_eq!(function_calls(&out), vec![GENERATE_PLOT, PLOT_FUNCTION]);
        let figures = out
            .iter()
            .filter(|e| matches!(e, AgentEvent::FunctionSuccess { payload: SuccessPayload::Plot { .. }, .. }))
            .count();
        assert_eq!(figures, 1);
        assert!(out.iter().all(|e| !matches!(
            e,
            AgentEvent::FunctionSuccess { payload: SuccessPayload::TableTransform { .. } | SuccessPayload::MultiTableTransform { .. }, .. }
        )));
        assert_eq!(count(&out, EventKind::CreateSubAgent), 1);
        assert_eq!(agent.output_figures().keys().collect::<Vec<_>>(), vec!["plot_0"]);

        // The sub-agent never asks for a closing reply.
        let acknowledgement = &provider.requests()[2];
        assert_matches!(
            &acknowledgement.input[..],
            [tabula_llm::InputItem::FunctionCallOutput { output, .. }]
                if output.contains("Successfully generated the plot. Continue with next steps if needed.")
        );
        assert_eq!(agent.events().all(), out.as_slice());
    }

    #[tokio::test]
    async fn sub_agent_slice_is_nested_in_the_parent_turn() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::function_call(
                GENERATE_PLOT,
                &json!({"table_name": "measurements", "user_request": "plot x vs y"}),
            ),
            ScriptedTurn::function_call(PLOT_FUNCTION, &json!({"code": SCATTER, "plot_name": "p"})),
            ScriptedTurn::text("Done."),
        ]));
        let mut agent = agent(&provider);
        let _ = agent.query("plot x vs y", &mut Vec::new()).await.unwrap();

        let list = agent.events();
        let AgentEvent::CreateSubAgent { agent_id: sub_id, response_id, call_id, .. } =
            list.last_of_kind(EventKind::CreateSubAgent).unwrap()
        else {
            unreachable!()
        };
        let found = list.find_create_sub_agent_event(response_id).unwrap();
        assert_eq!(found.call_id(), Some(call_id));

        let slice = list.agent_and_sub_agents_events(agent.id());
        let sub_events: Vec<&AgentEvent> = slice.iter().copied().filter(|e| e.agent_id() == sub_id).collect();
        let all_sub_events: Vec<&AgentEvent> = list.all().iter().filter(|e| e.agent_id() == sub_id).collect();
        assert_eq!(sub_events, all_sub_events);
        assert_matches!(sub_events.first(), Some(AgentEvent::CreateSubAgent { .. }));
        assert_matches!(sub_events.last(), Some(AgentEvent::ResponseCompleted { .. }));
    }

    #[tokio::test]
    async fn compound_request_only_runs_the_first_step() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::function_call(
                TRANSFORM_TABLE,
                &json!({
                    "table_name": "measurements",
                    "output_table_name": "measurements_x10",
                    "user_request": "multiply columns by 10",
                }),
            ),
            ScriptedTurn::function_call(
                TRANSFORM_FUNCTION,
                &json!({"code": TIMES_TEN, "transformed_table_name": "whatever"}),
            ),
            ScriptedTurn::text("Multiplied. Ask me for the plot next."),
            ScriptedTurn::function_call(
                GENERATE_PLOT,
                &json!({"table_name": "measurements_x10", "user_request": "scatter x vs y"}),
            ),
            ScriptedTurn::function_call(PLOT_FUNCTION, &json!({"code": SCATTER, "plot_name": "x10"})),
            ScriptedTurn::text("Plotted."),
        ]));
        let mut agent = agent(&provider);

        let mut first = Vec::new();
        let _ = agent
            .query("multiply columns by 10 then plot", &mut first)
            .await
            .unwrap();
        assert_eq!(function_calls(&first), vec![TRANSFORM_TABLE, TRANSFORM_FUNCTION]);
        let outputs = agent.output_tables();
        assert_eq!(outputs.keys().collect::<Vec<_>>(), vec!["measurements_x10"]);
        assert_eq!(
            outputs["measurements_x10"].column("y").unwrap().values,
            vec![Cell::Int(20), Cell::Int(40), Cell::Int(50)]
        );

        let mut second = Vec::new();
        let _ = agent.query("now the plot", &mut second).await.unwrap();
        assert_eq!(function_calls(&second), vec![GENERATE_PLOT, PLOT_FUNCTION]);

        assert_eq!(
            agent.available_tables().keys().collect::<Vec<_>>(),
            vec!["measurements", "measurements_x10"]
        );
        assert_eq!(agent.input_tables().keys().collect::<Vec<_>>(), vec!["measurements"]);
        // The second turn's instructions know about the new table.
        assert!(provider.requests()[3].instructions.contains("## Table 'measurements_x10'"));
    }

    #[tokio::test]
    async fn unknown_tables_are_reported_and_retried() {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::function_call(
                TRANSFORM_MULTIPLE_TABLES,
                &json!({
                    "table_names": ["measurements", "calibration"],
                    "output_table_names": ["joined"],
                    "user_request": "join with calibration",
                }),
            ),
            ScriptedTurn::text("There is no calibration table."),
        ]));
        let mut agent = agent(&provider);
        let mut out = Vec::new();
        let summary = agent.query("join with calibration", &mut out).await.unwrap();

        assert_eq!(summary.consecutive_errors, 1);
        assert_matches!(
            out.iter().find(|e| e.kind() == EventKind::FunctionError),
            Some(AgentEvent::FunctionError { kind: FunctionErrorKind::Validation, message, .. })
                if message == "Tables not found: calibration. Available tables: measurements"
        );
        assert_eq!(count(&out, EventKind::CreateSubAgent), 0);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn failing_sub_agent_becomes_one_orchestrator_error() {
        let broken = json!({"code": r#"(def fig (scatter (figure) :x (col df "z")))"#, "plot_name": "p"});
        let mut turns = vec![ScriptedTurn::function_call(
            GENERATE_PLOT,
            &json!({"table_name": "measurements", "user_request": "plot z"}),
        )];
        turns.extend((0..5).map(|_| ScriptedTurn::function_call(PLOT_FUNCTION, &broken)));
        turns.push(ScriptedTurn::text("Column z does not exist."));
        let provider = Arc::new(ScriptedProvider::new(turns));
        let mut agent = agent(&provider);
        let mut out = Vec::new();
        let summary = agent.query("plot z", &mut out).await.unwrap();

        assert_eq!(summary.state, CallState::Completed);
        assert_eq!(summary.consecutive_errors, 1);
        assert_eq!(count(&out, EventKind::Error), 1);
        assert_matches!(
            out.iter().rev().find(|e| e.kind() == EventKind::FunctionError),
            Some(AgentEvent::FunctionError { kind: FunctionErrorKind::SubAgent, agent_id, message, .. })
                if agent_id == agent.id() && message.contains("'z'")
        );
    }

    #[tokio::test]
    async fn streams_through_call_agent() {
        let provider = Arc::new(ScriptedProvider::new([ScriptedTurn::text("Which table?")]));
        let agent = agent(&provider);
        let input = QueryInput::Tables {
            tables: agent.available_tables(),
            output_table_names: None,
        };
        let (stream, handle) = call_agent(agent, UserQuery::new("help", input), 8);
        let events: Vec<AgentEvent> = stream.collect().await;
        let (agent, result) = handle.finish().await.unwrap();

        assert_eq!(result.unwrap().state, CallState::Completed);
        assert_eq!(agent.events().all(), events.as_slice());
    }
}
