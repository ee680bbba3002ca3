use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::message::Message;
use crate::errors::DomainError;
use crate::flows::states::{step_for_tool, Edge, RouteDecision, Step};

pub trait GraphDefinition {
    fn entry(&self) -> Step;
    fn edge(&self, step: Step) -> Edge;
}

/// Model call, cart mutations, and the confirm-then-execute purchase path.
#[derive(Clone, Debug, Default)]
pub struct OrderingGraph;

impl GraphDefinition for OrderingGraph {
    fn entry(&self) -> Step {
        Step::InvokeModel
    }

    fn edge(&self, step: Step) -> Edge {
        match step {
            Step::InvokeModel => Edge::Route,
            Step::RunTool | Step::AddToCart | Step::RemoveFromCart => Edge::Goto(Step::InvokeModel),
            Step::PreparePurchase => Edge::Goto(Step::PurchaseApproval),
            Step::PurchaseApproval => Edge::ApprovalDecision,
            Step::ExecutePurchase => Edge::End,
        }
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: GraphDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn entry(&self) -> Step {
        self.flow.entry()
    }

    pub fn edge(&self, step: Step) -> Edge {
        self.flow.edge(step)
    }

    pub fn route(&self, messages: &[Message]) -> Result<RouteDecision, DomainError> {
        decide_next_step(messages)
    }

    pub fn route_with_audit<S>(
        &self,
        messages: &[Message],
        sink: &S,
        audit: &AuditContext,
    ) -> Result<RouteDecision, DomainError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.route(messages);
        match &result {
            Ok(decision) => {
                let steps = match decision {
                    RouteDecision::End => "end".to_string(),
                    RouteDecision::Steps(steps) => {
                        steps.iter().map(Step::as_str).collect::<Vec<_>>().join(",")
                    }
                };
                sink.emit(
                    audit
                        .event("route.decided", AuditCategory::Routing, AuditOutcome::Success)
                        .with_metadata("steps", steps),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event("route.rejected", AuditCategory::Routing, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    /// Runs the approval gate, then picks the step that follows it.
    pub fn approval_decision(&self, messages: &[Message]) -> Result<Step, DomainError> {
        check_purchase_approval(messages)?;
        Ok(should_execute_purchase(messages))
    }
}

impl Default for FlowEngine<OrderingGraph> {
    fn default() -> Self {
        Self::new(OrderingGraph)
    }
}

/// Picks the next step(s) from the last message of the log.
///
/// Anything other than an assistant message re-invokes the model. An
/// assistant message without tool calls ends the turn. Otherwise each tool
/// call maps to one step, in request order, duplicates included.
pub fn decide_next_step(messages: &[Message]) -> Result<RouteDecision, DomainError> {
    let Some(last_message) = messages.last().filter(|message| message.is_assistant()) else {
        return Ok(RouteDecision::Steps(vec![Step::InvokeModel]));
    };

    let tool_calls = last_message.tool_calls();
    if tool_calls.is_empty() {
        return Ok(RouteDecision::End);
    }

    let steps = tool_calls.iter().map(|call| step_for_tool(&call.name)).collect::<Vec<_>>();
    if steps.is_empty() {
        return Err(DomainError::InvariantViolation(
            "expected tool calls to map to at least one step".to_string(),
        ));
    }

    Ok(RouteDecision::Steps(steps))
}

/// The approval step only proceeds from a tool result.
pub fn check_purchase_approval(messages: &[Message]) -> Result<(), DomainError> {
    match messages.last() {
        Some(message) if message.is_tool_result() => Ok(()),
        _ => Err(DomainError::ApprovalPreconditionViolation),
    }
}

/// `yes`/`y` (any case, surrounding whitespace ignored) executes the purchase;
/// anything else asks the model again.
pub fn should_execute_purchase(messages: &[Message]) -> Step {
    let decision =
        messages.last().and_then(Message::text).map(|text| text.trim().to_lowercase());

    match decision.as_deref() {
        Some("yes") | Some("y") => Step::ExecutePurchase,
        _ => Step::InvokeModel,
    }
}
