//! The Table Agent and everything around it.
//!
//! - [`tools`]: the three delegation tools, parsed into [`TableAgentTool`]
//! - [`table_agent`]: [`TableAgent`], delegation and table bookkeeping
//! - [`replay`]: [`Recording`]s and LLM-free [`replay`](replay::replay)

pub mod replay;
pub mod table_agent;
pub mod tools;

pub use replay::{RecordedEvent, Recording, ReplayOutput, record, recorded_table_keys, replay};
pub use table_agent::{TableAgent, TableAgentTools};
pub use tools::{Delegation, TableAgentTool, table_agent_tools};
