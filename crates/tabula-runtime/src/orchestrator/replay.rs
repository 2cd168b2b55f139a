//! Recording an orchestrator conversation and replaying it without the LLM.
//!
//! A [`Recording`] keeps only what is needed to redo the work: the user's
//! queries (with table names instead of tables), every function call with
//! its arguments, the model's full texts, sub-agent creations and the
//! orchestrator's acknowledgements. [`replay`] re-runs the recorded scripts
//! against a fresh set of input tables.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tabula_core::{AgentEvent, AgentEventList, AgentId, Figure, SuccessPayload, TableSet};
use tabula_sandbox::Sandbox;
use tracing::{debug, info, instrument, warn};

use super::table_agent::TableAgent;
use super::tools::TableAgentTool;
use crate::agent::{ToolCall, ToolContext, ToolHandler, ToolOutcome};
use crate::agents::Specialist;
use crate::errors::RuntimeError;

/// One kept entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedEvent {
    /// A user query to the orchestrator.
    UserQuery {
        /// The orchestrator.
        agent_id: AgentId,
        /// Request text.
        query: String,
        /// Names of the tables that were available.
        table_keys: Vec<String>,
    },
    /// A kept agent event.
    Event {
        /// The event.
        event: AgentEvent,
    },
}

/// Replayable history of one orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    /// The orchestrator.
    pub agent_id: AgentId,
    /// Kept entries, in emission order.
    pub events: Vec<RecordedEvent>,
}

fn is_kept(event: &AgentEvent) -> bool {
    matches!(
        event,
        AgentEvent::FunctionCall { .. }
            | AgentEvent::ResponseFullText { .. }
            | AgentEvent::CreateSubAgent { .. }
            | AgentEvent::FunctionSuccess {
                payload: SuccessPayload::SubAgent { .. },
                ..
            }
    )
}

/// Record everything needed to replay `agent`.
pub fn record(agent: &TableAgent) -> Recording {
    let agent_id = agent.id().clone();
    let events = agent
        .events()
        .into_iter()
        .filter_map(|event| match event {
            AgentEvent::UserQuery {
                agent_id: owner,
                query,
                input,
            } if *owner == agent_id => Some(RecordedEvent::UserQuery {
                agent_id: owner.clone(),
                query: query.clone(),
                table_keys: input.table_keys(),
            }),
            event if is_kept(event) => Some(RecordedEvent::Event {
                event: event.clone(),
            }),
            _ => None,
        })
        .collect();
    Recording { agent_id, events }
}

impl Recording {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, RuntimeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse the output of [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The kept agent events as a list.
    pub fn event_list(&self) -> AgentEventList {
        self.events
            .iter()
            .filter_map(|entry| match entry {
                RecordedEvent::Event { event } => Some(event.clone()),
                RecordedEvent::UserQuery { .. } => None,
            })
            .collect::<Vec<_>>()
            .into()
    }
}

/// What a replay reproduced.
#[derive(Clone, Debug, Default)]
pub struct ReplayOutput {
    /// Reproduced `code` and `function_success` events, in order.
    pub events: Vec<AgentEvent>,
    /// Produced tables (inputs excluded).
    pub tables: TableSet,
    /// Produced figures, keyed `plot_0`, `plot_1`, ...
    pub figures: IndexMap<String, Arc<Figure>>,
}

fn tool_call(event: &AgentEvent) -> Option<ToolCall> {
    match event {
        AgentEvent::FunctionCall {
            response_id,
            call_id,
            function_name,
            arguments,
            ..
        } => Some(ToolCall {
            response_id: response_id.clone(),
            call_id: call_id.clone(),
            function_name: function_name.clone(),
            arguments: arguments.clone(),
        }),
        _ => None,
    }
}

/// Re-run the recorded steps against `input_tables`.
///
/// Steps are replayed in order and later steps see the tables produced by
/// earlier ones. A step that was rejected originally is skipped; a step that
/// succeeded originally and cannot be reproduced is an error.
#[instrument(skip_all, fields(agent_id = %recording.agent_id))]
pub async fn replay(
    recording: &Recording,
    input_tables: TableSet,
    sandbox: Sandbox,
) -> Result<ReplayOutput, RuntimeError> {
    let list = recording.event_list();
    let mut tables = input_tables.clone();
    let mut output = ReplayOutput::default();

    let steps = list
        .all()
        .iter()
        .filter(|e| e.agent_id() == &recording.agent_id)
        .filter_map(tool_call);

    for step in steps {
        let succeeded = list.all().iter().any(|e| {
            matches!(
                e,
                AgentEvent::FunctionSuccess { agent_id, call_id, .. }
                    if *agent_id == recording.agent_id && *call_id == step.call_id
            )
        });
        let sub_agent = list
            .find_create_sub_agent_event(&step.response_id)
            .filter(|e| e.call_id() == Some(&step.call_id));
        let Some(AgentEvent::CreateSubAgent {
            agent_id: sub_agent_id,
            ..
        }) = sub_agent
        else {
            debug!(call_id = %step.call_id, "step was never delegated, skipping");
            continue;
        };

        let delegation = match TableAgentTool::parse(&step).and_then(|tool| tool.resolve(&tables)) {
            Ok(delegation) => delegation,
            Err(rejection) if succeeded => {
                return Err(RuntimeError::Replay(format!(
                    "step {} ({}) no longer applies: {}",
                    step.call_id,
                    step.function_name,
                    rejection.feedback()
                )));
            }
            Err(_) => continue,
        };
        let handler = Specialist::for_kind(delegation.kind, sandbox).ok_or_else(|| {
            RuntimeError::Internal(format!("no specialized agent for {}", delegation.kind))
        })?;

        let attempts = list
            .all()
            .iter()
            .filter(|e| e.agent_id() == sub_agent_id)
            .filter_map(tool_call);

        let mut reproduced = false;
        let mut last_failure = None;
        for attempt in attempts {
            let mut emitted: Vec<AgentEvent> = Vec::new();
            let mut ctx = ToolContext {
                agent_id: sub_agent_id,
                sink: &mut emitted,
            };
            let outcome = handler.handle(&attempt, &delegation.query.input, &mut ctx).await?;
            match &outcome {
                ToolOutcome::Success { payload, .. } => {
                    absorb(payload, &mut tables, &mut output.figures);
                    emitted.push(outcome.to_event(sub_agent_id, &attempt));
                    output.events.extend(emitted);
                    reproduced = true;
                    break;
                }
                ToolOutcome::Failure { .. } => last_failure = Some(outcome.feedback()),
            }
        }

        if reproduced {
            info!(call_id = %step.call_id, kind = %delegation.kind, "step reproduced");
        } else if succeeded {
            return Err(RuntimeError::Replay(format!(
                "step {} ({}) could not be reproduced: {}",
                step.call_id,
                step.function_name,
                last_failure.unwrap_or_else(|| "no recorded script".to_string())
            )));
        } else {
            warn!(call_id = %step.call_id, "step failed originally and fails again");
        }
    }

    output.tables = tables
        .into_iter()
        .filter(|(name, _)| !input_tables.contains_key(name))
        .collect();
    Ok(output)
}

fn absorb(
    payload: &SuccessPayload,
    tables: &mut TableSet,
    figures: &mut IndexMap<String, Arc<Figure>>,
) {
    match payload {
        SuccessPayload::TableTransform {
            table_name, table, ..
        } => {
            let _ = tables.insert(table_name.clone(), Arc::clone(table));
        }
        SuccessPayload::MultiTableTransform {
            tables: produced, ..
        } => {
            tables.extend(produced.iter().map(|(k, v)| (k.clone(), Arc::clone(v))));
        }
        SuccessPayload::Plot { figure, .. } => {
            let key = format!("plot_{}", figures.len());
            let _ = figures.insert(key, Arc::clone(figure));
        }
        SuccessPayload::SubAgent { .. } => {}
    }
}

/// Input tables of a recording, by the names its first query used.
pub fn recorded_table_keys(recording: &Recording) -> Vec<String> {
    recording
        .events
        .iter()
        .find_map(|entry| match entry {
            RecordedEvent::UserQuery { table_keys, .. } => Some(table_keys.clone()),
            RecordedEvent::Event { .. } => None,
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::agents::plot::PLOT_FUNCTION;
    use crate::agents::transform::TRANSFORM_FUNCTION;
    use crate::orchestrator::tools::{GENERATE_PLOT, TRANSFORM_TABLE};
    use assert_matches::assert_matches;
    use serde_json::json;
    use tabula_core::{Cell, Column, EventKind, Table};
    use tabula_llm::testing::{ScriptedProvider, ScriptedTurn};

    fn readings(values: &[i64]) -> TableSet {
        let table = Table::new(vec![
            Column::new("t", (0_i64..).take(values.len()).map(Cell::from).collect()),
            Column::new("value", values.iter().copied().map(Cell::from).collect()),
        ])
        .unwrap();
        let mut tables = TableSet::new();
        let _ = tables.insert("readings".into(), Arc::new(table));
        tables
    }

    const FILTER: &str = r#"(def transformed_df (filter df (> (col df "value") 10)))"#;
    const LINE: &str = r#"(def fig (line (figure :title "high") :x (col df "t") :y (col df "value")))"#;

    /// Two turns: a transform that needs one retry, then a plot of its output.
    async fn recorded_session() -> TableAgent {
        let provider = Arc::new(ScriptedProvider::new([
            ScriptedTurn::function_call(
                TRANSFORM_TABLE,
                &json!({"table_name": "readings", "output_table_name": "high", "user_request": "keep values over 10"}),
            ),
            ScriptedTurn::function_call(
                TRANSFORM_FUNCTION,
                &json!({"code": r#"(def transformed_df (filter df (> (col df "val") 10)))"#}),
            ),
            ScriptedTurn::function_call(TRANSFORM_FUNCTION, &json!({"code": FILTER})),
            ScriptedTurn::text("Kept the high readings."),
            ScriptedTurn::function_call(
                GENERATE_PLOT,
                &json!({"table_name": "high", "user_request": "line chart"}),
            ),
            ScriptedTurn::function_call(PLOT_FUNCTION, &json!({"code": LINE, "plot_name": "high"})),
            ScriptedTurn::text("Here it is."),
        ]));
        let mut agent = TableAgent::new(
            provider,
            AgentConfig::default(),
            Sandbox::default(),
            readings(&[5, 12, 30]),
        );
        let _ = agent.query("keep values over 10", &mut Vec::new()).await.unwrap();
        let _ = agent.query("plot them", &mut Vec::new()).await.unwrap();
        agent
    }

    #[tokio::test]
    async fn recording_keeps_only_replayable_entries() {
        let agent = recorded_session().await;
        let recording = record(&agent);

        let queries: Vec<&RecordedEvent> = recording
            .events
            .iter()
            .filter(|e| matches!(e, RecordedEvent::UserQuery { .. }))
            .collect();
        assert_eq!(queries.len(), 2);
        assert_matches!(
            queries[1],
            RecordedEvent::UserQuery { table_keys, .. } if table_keys == &vec!["readings".to_string(), "high".to_string()]
        );
        let list = recording.event_list();
        assert!(list.all().iter().all(|e| matches!(
            e.kind(),
            EventKind::FunctionCall | EventKind::ResponseFullText | EventKind::CreateSubAgent | EventKind::FunctionSuccess
        )));
        assert_eq!(
            recorded_table_keys(&recording),
            vec!["readings".to_string()]
        );

        let json = recording.to_json().unwrap();
        assert!(!json.contains("\"columns\""));
        assert_eq!(Recording::from_json(&json).unwrap(), recording);
    }

    #[tokio::test]
    async fn replay_reproduces_tables_and_figures() {
        let agent = recorded_session().await;
        let recording = Recording::from_json(&record(&agent).to_json().unwrap()).unwrap();

        let output = replay(&recording, readings(&[5, 12, 30]), Sandbox::default())
            .await
            .unwrap();

        assert_eq!(output.tables.keys().collect::<Vec<_>>(), vec!["high"]);
        assert_eq!(
            output.tables["high"].to_csv_string().unwrap(),
            agent.output_tables()["high"].to_csv_string().unwrap()
        );
        assert_eq!(output.figures.keys().collect::<Vec<_>>(), vec!["plot_0"]);
        assert_eq!(output.figures["plot_0"], agent.output_figures()["plot_0"]);
        let kinds: Vec<EventKind> = output.events.iter().map(AgentEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Code, EventKind::FunctionSuccess, EventKind::Code, EventKind::FunctionSuccess]
        );
    }

    #[tokio::test]
    async fn replay_on_new_data_recomputes() {
        let agent = recorded_session().await;
        let output = replay(&record(&agent), readings(&[50, 1, 11, 2]), Sandbox::default())
            .await
            .unwrap();
        assert_eq!(
            output.tables["high"].column("value").unwrap().values,
            vec![Cell::Int(50), Cell::Int(11)]
        );
    }

    #[tokio::test]
    async fn replay_fails_when_a_successful_step_breaks() {
        let agent = recorded_session().await;
        let mut renamed = TableSet::new();
        let _ = renamed.insert("sensor".into(), readings(&[1])["readings"].clone());

        assert_matches!(
            replay(&record(&agent), renamed, Sandbox::default()).await,
            Err(RuntimeError::Replay(message)) if message.contains("Table 'readings' not found")
        );
    }
}
