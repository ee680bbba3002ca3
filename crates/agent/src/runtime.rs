use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use orderly_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, TracingAuditSink};
use orderly_core::catalog::MenuCatalog;
use orderly_core::config::{AgentConfig, InvocationConfig};
use orderly_core::domain::cart::Cart;
use orderly_core::domain::conversation::ConversationState;
use orderly_core::domain::message::Message;
use orderly_core::errors::{ApplicationError, DomainError};
use orderly_core::flows::{Edge, FlowEngine, OrderingGraph, RouteDecision, Step};

use crate::handlers::{self, PrepareOutcome, TurnContext};
use crate::llm::LlmClient;
use crate::memory::{MemoryStore, Namespace};
use crate::tools::ToolRegistry;

/// How a turn ended.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    /// The model answered without requesting further actions.
    Completed { reply: Option<String> },
    /// A purchase is prepared; the next message is read as the confirmation.
    AwaitingApproval { cart: Cart, prompt: String },
    Purchased { summary: String },
}

impl TurnOutcome {
    pub fn reply_text(&self) -> &str {
        match self {
            Self::Completed { reply } => reply.as_deref().unwrap_or(""),
            Self::AwaitingApproval { prompt, .. } => prompt,
            Self::Purchased { summary } => summary,
        }
    }
}

const APPROVAL_DECIDED: &str = "purchase.approval_decided";

enum FanOut {
    Continue(Step),
    Finish(TurnOutcome),
}

pub struct AgentRuntime {
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    memory: Arc<dyn MemoryStore>,
    tools: ToolRegistry,
    engine: FlowEngine<OrderingGraph>,
    audit_sink: Arc<dyn AuditSink>,
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationState>>>>,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, llm: Arc<dyn LlmClient>, memory: Arc<dyn MemoryStore>) -> Self {
        Self {
            config,
            llm,
            memory,
            tools: ToolRegistry::with_defaults(MenuCatalog::burger_menu()),
            engine: FlowEngine::default(),
            audit_sink: Arc::new(TracingAuditSink),
            sessions: RwLock::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub async fn handle_thread_message(
        &self,
        thread_id: &str,
        text: &str,
    ) -> Result<TurnOutcome, ApplicationError> {
        self.handle_thread_message_with(thread_id, text, &InvocationConfig::default()).await
    }

    /// Runs one turn for `thread_id`. While a purchase awaits approval,
    /// `text` is taken as the user's answer to it.
    ///
    /// A failed turn leaves the session as it was before the turn started.
    pub async fn handle_thread_message_with(
        &self,
        thread_id: &str,
        text: &str,
        invocation: &InvocationConfig,
    ) -> Result<TurnOutcome, ApplicationError> {
        let agent = self
            .config
            .resolve_for_invocation(invocation)
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        let session = self.session(thread_id).await;
        let mut state = session.lock().await;
        let checkpoint = state.clone();

        let correlation_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(
            Some(thread_id.to_string()),
            Some(agent.user_id.clone()),
            correlation_id.clone(),
            "agent-runtime",
        );
        let context =
            TurnContext { user_id: &agent.user_id, audit: &audit, sink: self.audit_sink.as_ref() };

        let start = match state.pending_approval.take() {
            Some(pending) => {
                state.push(Message::tool_result(pending.call_id, Some(pending.tool_name), text));
                Step::PurchaseApproval
            }
            None => {
                state.push(Message::user(text));
                self.engine.entry()
            }
        };

        info!(
            event_name = "agent.turn.started",
            session_id = %thread_id,
            correlation_id = %correlation_id,
            user_id = %agent.user_id,
            start = %start,
            "turn started"
        );

        let result = self.run_turn(&mut state, start, &agent, &context).await;
        match &result {
            Ok(outcome) => {
                let outcome_name = match outcome {
                    TurnOutcome::Completed { .. } => "completed",
                    TurnOutcome::AwaitingApproval { .. } => "awaiting_approval",
                    TurnOutcome::Purchased { .. } => "purchased",
                };
                info!(
                    event_name = "agent.turn.finished",
                    session_id = %thread_id,
                    correlation_id = %correlation_id,
                    outcome = outcome_name,
                    messages = state.messages().len(),
                    "turn finished"
                );
            }
            Err(error) => {
                warn!(
                    event_name = "agent.turn.failed",
                    session_id = %thread_id,
                    correlation_id = %correlation_id,
                    error = %error,
                    "turn failed; session restored"
                );
                self.audit_sink.emit(
                    audit
                        .event("agent.turn.failed", AuditCategory::System, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                *state = checkpoint;
            }
        }
        result
    }

    async fn run_turn(
        &self,
        state: &mut ConversationState,
        start: Step,
        agent: &AgentConfig,
        context: &TurnContext<'_>,
    ) -> Result<TurnOutcome, ApplicationError> {
        let mut steps_taken = 0;
        let mut next = start;

        loop {
            count_step(&mut steps_taken, agent.recursion_limit)?;
            debug!(
                event_name = "agent.step",
                session_id = %state.session_id,
                step = %next,
                "running step"
            );

            match next {
                Step::InvokeModel => {
                    handlers::invoke_model(
                        state,
                        self.llm.as_ref(),
                        self.memory.as_ref(),
                        agent,
                        context,
                    )
                    .await?;

                    let decision = self.engine.route_with_audit(
                        state.messages(),
                        self.audit_sink.as_ref(),
                        context.audit,
                    )?;
                    match decision {
                        RouteDecision::End => {
                            return Ok(TurnOutcome::Completed { reply: last_text(state) });
                        }
                        RouteDecision::Steps(routed) => {
                            let fan_out = self
                                .dispatch(state, routed, agent, context, &mut steps_taken)
                                .await?;
                            match fan_out {
                                FanOut::Continue(step) => next = step,
                                FanOut::Finish(outcome) => return Ok(outcome),
                            }
                        }
                    }
                }
                Step::PurchaseApproval => {
                    let decided = self.engine.approval_decision(state.messages());
                    let event = match &decided {
                        Ok(step) => context
                            .audit
                            .event(APPROVAL_DECIDED, AuditCategory::Purchase, AuditOutcome::Success)
                            .with_metadata("next_step", step.as_str()),
                        Err(error) => context
                            .audit
                            .event(
                                APPROVAL_DECIDED,
                                AuditCategory::Purchase,
                                AuditOutcome::Rejected,
                            )
                            .with_metadata("error", error.to_string()),
                    };
                    self.audit_sink.emit(event);
                    next = decided?;
                }
                Step::ExecutePurchase => {
                    let summary = handlers::execute_purchase(state, context)?;
                    return match self.engine.edge(Step::ExecutePurchase) {
                        Edge::End => Ok(TurnOutcome::Purchased { summary }),
                        edge => Err(unexpected_edge(Step::ExecutePurchase, edge)),
                    };
                }
                other => {
                    return Err(DomainError::InvariantViolation(format!(
                        "step `{other}` is only reachable through a routed tool call"
                    ))
                    .into());
                }
            }
        }
    }

    /// Runs the routed steps against the tool calls of the last assistant
    /// message, pairing them by position.
    async fn dispatch(
        &self,
        state: &mut ConversationState,
        routed: Vec<Step>,
        agent: &AgentConfig,
        context: &TurnContext<'_>,
        steps_taken: &mut usize,
    ) -> Result<FanOut, ApplicationError> {
        let calls = state
            .last_message()
            .map(|message| message.tool_calls().to_vec())
            .unwrap_or_default();
        if calls.is_empty() {
            return Ok(FanOut::Continue(Step::InvokeModel));
        }
        if routed.len() != calls.len() {
            return Err(DomainError::InvariantViolation(format!(
                "router produced {} steps for {} tool calls",
                routed.len(),
                calls.len()
            ))
            .into());
        }

        let mut awaiting_approval = false;
        let mut missing_information = false;

        for (step, call) in routed.into_iter().zip(calls) {
            if state.has_tool_result(&call.id) {
                debug!(
                    event_name = "agent.step.skipped",
                    session_id = %state.session_id,
                    call_id = %call.id,
                    step = %step,
                    "tool call already answered"
                );
                continue;
            }
            count_step(steps_taken, agent.recursion_limit)?;

            match step {
                Step::AddToCart => handlers::add_to_cart(state, &call, context)?,
                Step::RemoveFromCart => handlers::remove_from_cart(state, &call, context)?,
                Step::RunTool => handlers::run_tool(state, &call, &self.tools, context).await,
                Step::PreparePurchase => match handlers::prepare_purchase(state, &call, context)? {
                    PrepareOutcome::Prepared => awaiting_approval = true,
                    PrepareOutcome::MissingInformation => missing_information = true,
                },
                other => {
                    return Err(DomainError::InvariantViolation(format!(
                        "step `{other}` cannot handle a tool call"
                    ))
                    .into());
                }
            }

            match self.engine.edge(step) {
                Edge::Goto(Step::InvokeModel) | Edge::Goto(Step::PurchaseApproval) => {}
                edge => return Err(unexpected_edge(step, edge)),
            }
        }

        if missing_information {
            return Ok(FanOut::Finish(TurnOutcome::Completed { reply: last_text(state) }));
        }

        if awaiting_approval {
            let cart = state.cart.clone().ok_or(DomainError::NoActiveCart)?;
            let prompt = format!(
                "Please confirm your order of {} items for a total of {} KRW. \
                 Reply 'yes' to purchase.",
                cart.total_quantity(),
                cart.total_price().normalize()
            );
            return Ok(FanOut::Finish(TurnOutcome::AwaitingApproval { cart, prompt }));
        }

        Ok(FanOut::Continue(Step::InvokeModel))
    }

    async fn session(&self, thread_id: &str) -> Arc<Mutex<ConversationState>> {
        if let Some(session) = self.sessions.read().await.get(thread_id) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(thread_id)))),
        )
    }

    /// Copy of a session's state for external persistence.
    pub async fn snapshot(&self, thread_id: &str) -> Option<ConversationState> {
        let session = self.sessions.read().await.get(thread_id).cloned()?;
        let state = session.lock().await;
        Some(state.clone())
    }

    /// Installs a previously exported session, replacing any live one.
    pub async fn restore(&self, state: ConversationState) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(state.session_id.clone(), Arc::new(Mutex::new(state)));
    }

    /// Drops the session for `thread_id`, returning its final state.
    pub async fn end_session(&self, thread_id: &str) -> Option<ConversationState> {
        let session = self.sessions.write().await.remove(thread_id)?;
        let state = session.lock().await.clone();
        info!(
            event_name = "agent.session.ended",
            session_id = %thread_id,
            messages = state.messages().len(),
            "session ended"
        );
        Some(state)
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids = self.sessions.read().await.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    /// Stores a fact about `user_id` for later turns to recall.
    pub async fn remember(
        &self,
        user_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ApplicationError> {
        self.memory.put(&Namespace::memories(user_id), key, value).await
    }
}

fn count_step(steps_taken: &mut usize, limit: usize) -> Result<(), ApplicationError> {
    *steps_taken += 1;
    if *steps_taken > limit {
        return Err(ApplicationError::StepLimitExceeded { limit });
    }
    Ok(())
}

fn last_text(state: &ConversationState) -> Option<String> {
    state.last_message().and_then(Message::text).map(str::to_string)
}

fn unexpected_edge(step: Step, edge: Edge) -> ApplicationError {
    DomainError::InvariantViolation(format!("unexpected edge {edge:?} after step `{step}`")).into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use orderly_core::audit::InMemoryAuditSink;
    use orderly_core::config::AgentConfig;
    use orderly_core::domain::message::{Message, ToolCall};
    use orderly_core::errors::ApplicationError;

    use super::{AgentRuntime, TurnOutcome};
    use crate::llm::ScriptedLlmClient;
    use crate::memory::InMemoryMemoryStore;

    fn runtime(llm: &ScriptedLlmClient, recursion_limit: usize) -> AgentRuntime {
        AgentRuntime::new(
            AgentConfig { recursion_limit, ..AgentConfig::default() },
            Arc::new(llm.clone()),
            Arc::new(InMemoryMemoryStore::default()),
        )
        .with_audit_sink(Arc::new(InMemoryAuditSink::default()))
    }

    #[tokio::test]
    async fn plain_reply_completes_the_turn() {
        let llm = ScriptedLlmClient::new([Message::assistant_text("Hello! Hungry?")]);
        let runtime = runtime(&llm, 25);

        let outcome = runtime.handle_thread_message("t-1", "hi").await.expect("turn");

        assert_eq!(outcome, TurnOutcome::Completed { reply: Some("Hello! Hungry?".to_string()) });
        let state = runtime.snapshot("t-1").await.expect("session");
        assert_eq!(state.messages().len(), 2);
    }

    #[tokio::test]
    async fn step_limit_aborts_and_restores_the_session() {
        let llm = ScriptedLlmClient::new((0..5).map(|index| {
            Message::assistant_tool_calls(vec![ToolCall::new(
                format!("call-{index}"),
                "suggest_burgers",
                json!({}),
            )])
        }));
        let runtime = runtime(&llm, 3);

        let error =
            runtime.handle_thread_message("t-1", "show me burgers").await.expect_err("limit");

        assert_eq!(error, ApplicationError::StepLimitExceeded { limit: 3 });
        let state = runtime.snapshot("t-1").await.expect("session");
        assert!(state.messages().is_empty());
    }

    #[tokio::test]
    async fn sessions_are_kept_per_thread() {
        let llm =
            ScriptedLlmClient::new([Message::assistant_text("a"), Message::assistant_text("b")]);
        let runtime = runtime(&llm, 25);

        runtime.handle_thread_message("t-1", "hi").await.expect("turn");
        runtime.handle_thread_message("t-2", "hello").await.expect("turn");

        assert_eq!(runtime.session_ids().await, vec!["t-1".to_string(), "t-2".to_string()]);
        let first = runtime.snapshot("t-1").await.expect("session");
        assert_eq!(first.messages()[0], Message::user("hi"));
    }

    #[tokio::test]
    async fn ended_sessions_are_dropped_and_returned() {
        let llm =
            ScriptedLlmClient::new([Message::assistant_text("a"), Message::assistant_text("b")]);
        let runtime = runtime(&llm, 25);
        runtime.handle_thread_message("t-1", "hi").await.expect("turn");
        runtime.handle_thread_message("t-2", "hello").await.expect("turn");

        let ended = runtime.end_session("t-1").await.expect("live session");

        assert_eq!(ended.messages().len(), 2);
        assert_eq!(runtime.session_ids().await, vec!["t-2".to_string()]);
        assert!(runtime.snapshot("t-1").await.is_none());
        assert!(runtime.end_session("t-1").await.is_none());
    }
}
