pub mod engine;
pub mod states;

pub use engine::{
    check_purchase_approval, decide_next_step, should_execute_purchase, FlowEngine,
    GraphDefinition, OrderingGraph,
};
pub use states::{step_for_tool, Edge, RouteDecision, Step, ToolName, UnknownToolName};
