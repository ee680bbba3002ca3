use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use orderly_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use orderly_core::config::AgentConfig;
use orderly_core::domain::cart::Cart;
use orderly_core::domain::conversation::{ConversationState, PendingApproval};
use orderly_core::domain::message::{Message, ToolCall};
use orderly_core::errors::{ApplicationError, DomainError};
use orderly_core::flows::ToolName;

use crate::llm::{CompletionRequest, LlmClient};
use crate::memory::{MemoryStore, Namespace};
use crate::prompt::{format_memories, render_system_prompt};
use crate::tools::{
    declared_tools, parse_arguments, render_tool_output, AddToCartArgs, PurchaseArgs,
    RemoveFromCartArgs, ToolContext, ToolRegistry,
};

pub const MEMORY_SEARCH_LIMIT: usize = 10;

const MISSING_PURCHASE_PROMPT: &str =
    "Please provide the purchasing burgers to further process your order.";

/// Who is acting in the current turn and where its audit events go.
pub struct TurnContext<'a> {
    pub user_id: &'a str,
    pub audit: &'a AuditContext,
    pub sink: &'a dyn AuditSink,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Cart replaced; the purchase call now waits for the user's answer.
    Prepared,
    /// No purchase payload; every open call was answered and the user asked for items.
    MissingInformation,
}

fn expect_call(call: &ToolCall, tool: ToolName) -> Result<(), DomainError> {
    if call.name == tool.as_str() {
        Ok(())
    } else {
        Err(DomainError::MissingToolCall { tool_name: tool.as_str().to_string() })
    }
}

pub fn add_to_cart(
    state: &mut ConversationState,
    call: &ToolCall,
    context: &TurnContext<'_>,
) -> Result<(), DomainError> {
    expect_call(call, ToolName::AddBurgerToCart)?;
    let args: AddToCartArgs = parse_arguments(ToolName::AddBurgerToCart, &call.arguments)?;
    let line = args.purchase_burger_item;

    let cart = state.cart_mut();
    if let Err(error) = cart.add_line(line.clone()) {
        context.sink.emit(
            context
                .audit
                .event("cart.line_added", AuditCategory::Cart, AuditOutcome::Rejected)
                .with_metadata("item_id", line.item_id.to_string())
                .with_metadata("error", error.to_string()),
        );
        return Err(error);
    }
    let total_price = cart.total_price();

    info!(
        event_name = "cart.line_added",
        session_id = %state.session_id,
        item_id = %line.item_id,
        quantity = line.quantity,
        total_price = %total_price,
        "added line to cart"
    );
    context.sink.emit(
        context
            .audit
            .event("cart.line_added", AuditCategory::Cart, AuditOutcome::Success)
            .with_metadata("item_id", line.item_id.to_string())
            .with_metadata("quantity", line.quantity.to_string()),
    );

    state.push(Message::tool_result(
        call.id.clone(),
        Some(call.name.clone()),
        format!("Successfully added {} to {}'s cart.", line.name, context.user_id),
    ));
    Ok(())
}

pub fn remove_from_cart(
    state: &mut ConversationState,
    call: &ToolCall,
    context: &TurnContext<'_>,
) -> Result<(), DomainError> {
    expect_call(call, ToolName::RemoveBurgerFromCart)?;
    let args: RemoveFromCartArgs =
        parse_arguments(ToolName::RemoveBurgerFromCart, &call.arguments)?;
    let line = args.purchase_burger_item;

    let removed = match state.cart.as_mut() {
        Some(cart) => cart.remove_line(&line),
        None => Err(DomainError::ItemNotFound { item_id: line.item_id, name: line.name.clone() }),
    };
    let removed = match removed {
        Ok(removed) => removed,
        Err(error) => {
            context.sink.emit(
                context
                    .audit
                    .event("cart.line_removed", AuditCategory::Cart, AuditOutcome::Rejected)
                    .with_metadata("item_id", line.item_id.to_string())
                    .with_metadata("error", error.to_string()),
            );
            return Err(error);
        }
    };

    info!(
        event_name = "cart.line_removed",
        session_id = %state.session_id,
        item_id = %removed.item_id,
        quantity = removed.quantity,
        "removed line from cart"
    );
    context.sink.emit(
        context
            .audit
            .event("cart.line_removed", AuditCategory::Cart, AuditOutcome::Success)
            .with_metadata("item_id", removed.item_id.to_string())
            .with_metadata("quantity", removed.quantity.to_string()),
    );

    state.push(Message::tool_result(
        call.id.clone(),
        Some(call.name.clone()),
        format!("Successfully removed {} from {}'s cart.", removed.name, context.user_id),
    ));
    Ok(())
}

pub fn prepare_purchase(
    state: &mut ConversationState,
    call: &ToolCall,
    context: &TurnContext<'_>,
) -> Result<PrepareOutcome, DomainError> {
    expect_call(call, ToolName::PurchaseBurgerItems)?;
    let args: PurchaseArgs = parse_arguments(ToolName::PurchaseBurgerItems, &call.arguments)?;

    let Some(information) = args.purchase_information()? else {
        let open_calls = state
            .messages()
            .iter()
            .rev()
            .find(|message| message.is_assistant())
            .map(|message| message.tool_calls().to_vec())
            .unwrap_or_default();
        for open_call in open_calls {
            if state.has_tool_result(&open_call.id) {
                continue;
            }
            state.push(Message::tool_result(
                open_call.id.clone(),
                Some(open_call.name.clone()),
                format!("Please provide the missing information for the {} tool.", open_call.name),
            ));
        }
        state.push(Message::assistant_text(MISSING_PURCHASE_PROMPT));
        state.pending_approval = None;

        context.sink.emit(context.audit.event(
            "purchase.missing_information",
            AuditCategory::Purchase,
            AuditOutcome::Rejected,
        ));
        return Ok(PrepareOutcome::MissingInformation);
    };

    let cart = Cart::try_from(information.clone())?;
    if !information.declared_totals_match(&cart) {
        warn!(
            event_name = "purchase.totals_recomputed",
            session_id = %state.session_id,
            declared_price = ?information.total_price,
            declared_quantity = ?information.total_quantity,
            total_price = %cart.total_price(),
            total_quantity = cart.total_quantity(),
            "declared purchase totals disagree with the items; using recomputed totals"
        );
    }

    info!(
        event_name = "purchase.prepared",
        session_id = %state.session_id,
        call_id = %call.id,
        total_quantity = cart.total_quantity(),
        total_price = %cart.total_price(),
        "purchase prepared, awaiting approval"
    );
    context.sink.emit(
        context
            .audit
            .event("purchase.prepared", AuditCategory::Purchase, AuditOutcome::Success)
            .with_metadata("total_quantity", cart.total_quantity().to_string())
            .with_metadata("total_price", cart.total_price().to_string()),
    );

    state.cart = Some(cart);
    state.pending_approval =
        Some(PendingApproval { call_id: call.id.clone(), tool_name: call.name.clone() });
    Ok(PrepareOutcome::Prepared)
}

/// Records the executed purchase and returns the closing summary text.
pub fn execute_purchase(
    state: &mut ConversationState,
    context: &TurnContext<'_>,
) -> Result<String, DomainError> {
    let cart = state.cart.clone().ok_or(DomainError::NoActiveCart)?;
    let payload = serde_json::to_value(&cart).map_err(|error| {
        DomainError::InvariantViolation(format!("cart not serializable: {error}"))
    })?;

    let call_id = format!("tool_{}", Uuid::new_v4());
    let tool_name = ToolName::ExecutePurchase.as_str();
    let summary = format!(
        "Successfully purchased {} items for a total of {} KRW.",
        cart.total_quantity(),
        cart.total_price().normalize()
    );

    state.extend([
        Message::assistant_tool_calls(vec![ToolCall::new(
            call_id.clone(),
            tool_name,
            json!({ "purchase_information": payload }),
        )]),
        Message::tool_result(
            call_id.clone(),
            Some(tool_name.to_string()),
            json!({ "success": true }).to_string(),
        ),
        Message::assistant_text(summary.clone()),
    ]);

    info!(
        event_name = "purchase.executed",
        session_id = %state.session_id,
        call_id = %call_id,
        total_quantity = cart.total_quantity(),
        total_price = %cart.total_price(),
        "purchase executed"
    );
    context.sink.emit(
        context
            .audit
            .event("purchase.executed", AuditCategory::Purchase, AuditOutcome::Success)
            .with_metadata("call_id", call_id)
            .with_metadata("total_price", cart.total_price().to_string()),
    );

    Ok(summary)
}

/// Runs a generic tool and appends its result. Unknown tools and tool
/// failures are reported back to the model as the tool result.
pub async fn run_tool(
    state: &mut ConversationState,
    call: &ToolCall,
    registry: &ToolRegistry,
    context: &TurnContext<'_>,
) {
    let content = match registry.get(&call.name) {
        None => {
            warn!(
                event_name = "tool.unknown",
                session_id = %state.session_id,
                tool_name = %call.name,
                "model requested an unknown tool"
            );
            format!(
                "Error: {} is not a valid tool, try one of [{}].",
                call.name,
                registry.names().join(", ")
            )
        }
        Some(tool) => {
            let tool_context =
                ToolContext { user_id: context.user_id.to_string(), cart: state.cart.clone() };
            match tool.execute(call.arguments.clone(), &tool_context).await {
                Ok(output) => render_tool_output(&output),
                Err(error) => {
                    warn!(
                        event_name = "tool.failed",
                        session_id = %state.session_id,
                        tool_name = %call.name,
                        error = %error,
                        "tool execution failed"
                    );
                    format!("Error: {error}")
                }
            }
        }
    };

    state.push(Message::tool_result(call.id.clone(), Some(call.name.clone()), content));
}

/// Recalls the user's memories, renders the system prompt, and appends the
/// model's next assistant message.
pub async fn invoke_model(
    state: &mut ConversationState,
    llm: &dyn LlmClient,
    memory: &dyn MemoryStore,
    agent: &AgentConfig,
    context: &TurnContext<'_>,
) -> Result<(), ApplicationError> {
    let memories = memory.search(&Namespace::memories(&agent.user_id), MEMORY_SEARCH_LIMIT).await?;
    let system_prompt =
        render_system_prompt(&agent.system_prompt, &format_memories(&memories), Utc::now());

    let request = CompletionRequest {
        model: agent.model.clone(),
        system_prompt,
        messages: state.messages().to_vec(),
        tools: declared_tools(),
    };

    let message = match llm.complete(request).await {
        Ok(message) => message,
        Err(error) => {
            context.sink.emit(
                context
                    .audit
                    .event("model.invoked", AuditCategory::Model, AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            return Err(ApplicationError::Llm(format!("{error:#}")));
        }
    };

    context.sink.emit(
        context
            .audit
            .event("model.invoked", AuditCategory::Model, AuditOutcome::Success)
            .with_metadata("memories", memories.len().to_string())
            .with_metadata("tool_calls", message.tool_calls().len().to_string()),
    );
    state.push(message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use orderly_core::audit::{AuditContext, InMemoryAuditSink};
    use orderly_core::catalog::MenuCatalog;
    use orderly_core::config::AgentConfig;
    use orderly_core::domain::cart::{Cart, CartLine};
    use orderly_core::domain::conversation::ConversationState;
    use orderly_core::domain::menu::MenuItemId;
    use orderly_core::domain::message::{Message, ToolCall};
    use orderly_core::errors::{ApplicationError, DomainError};

    use super::{
        add_to_cart, execute_purchase, invoke_model, prepare_purchase, remove_from_cart,
        run_tool, PrepareOutcome, TurnContext,
    };
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{InMemoryMemoryStore, MemoryStore, Namespace};
    use crate::tools::ToolRegistry;

    fn line(id: u32, name: &str, price: i64, quantity: u32) -> CartLine {
        CartLine {
            item_id: MenuItemId(id),
            name: name.to_string(),
            unit_price: Decimal::from(price),
            quantity,
            selected_options: Vec::new(),
        }
    }

    fn line_payload(line: &CartLine) -> Value {
        json!({ "purchase_burger_item": line })
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall::new(id, name, arguments)
    }

    struct Fixture {
        sink: InMemoryAuditSink,
        audit: AuditContext,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sink: InMemoryAuditSink::default(),
                audit: AuditContext::new(
                    Some("thread-1".to_owned()),
                    Some("jack".to_owned()),
                    "turn-1",
                    "test",
                ),
            }
        }

        fn context(&self) -> TurnContext<'_> {
            TurnContext { user_id: "jack", audit: &self.audit, sink: &self.sink }
        }
    }

    #[test]
    fn add_to_cart_creates_cart_and_acknowledges() {
        let fixture = Fixture::new();
        let big_mac = line(7, "빅맥®", 6900, 2);
        let add = call("call-1", "add_burger_to_cart_tool", line_payload(&big_mac));
        let mut state = ConversationState::with_messages(
            "thread-1",
            vec![Message::assistant_tool_calls(vec![add.clone()])],
        );

        add_to_cart(&mut state, &add, &fixture.context()).expect("add");

        let cart = state.cart.as_ref().expect("cart created");
        assert_eq!(cart.lines(), &[big_mac]);
        assert_eq!(cart.total_items(), 1);
        assert_eq!(cart.total_quantity(), 2);
        assert_eq!(cart.total_price(), Decimal::from(13800));
        assert_eq!(state.last_message().and_then(Message::tool_call_id), Some("call-1"));
        assert_eq!(
            state.last_message().and_then(Message::text),
            Some("Successfully added 빅맥® to jack's cart.")
        );
        assert_eq!(fixture.sink.events()[0].event_type, "cart.line_added");
    }

    #[test]
    fn handlers_reject_a_mismatched_call() {
        let fixture = Fixture::new();
        let suggest = call("call-1", "suggest_burgers", json!({}));
        let mut state = ConversationState::new("thread-1");

        let error = add_to_cart(&mut state, &suggest, &fixture.context()).expect_err("wrong call");
        assert_eq!(
            error,
            DomainError::MissingToolCall { tool_name: "add_burger_to_cart_tool".to_string() }
        );
        assert!(state.cart.is_none());
    }

    #[test]
    fn add_then_remove_restores_the_cart() {
        let fixture = Fixture::new();
        let mut state = ConversationState::new("thread-1");
        state.cart = Some(Cart::from_lines(vec![line(18, "치즈버거", 5900, 1)]).expect("cart"));
        let before = state.cart.clone();

        let payload = line_payload(&line(7, "빅맥®", 6900, 2));
        let add = call("call-1", "add_burger_to_cart_tool", payload.clone());
        add_to_cart(&mut state, &add, &fixture.context()).expect("add");
        let remove = call("call-2", "remove_burger_from_cart_tool", payload);
        remove_from_cart(&mut state, &remove, &fixture.context()).expect("remove");

        assert_eq!(state.cart, before);
        assert_eq!(
            state.last_message().and_then(Message::text),
            Some("Successfully removed 빅맥® from jack's cart.")
        );
    }

    #[test]
    fn removing_a_missing_line_fails_and_leaves_cart_unchanged() {
        let fixture = Fixture::new();
        let mut state = ConversationState::new("thread-1");
        state.cart = Some(Cart::from_lines(vec![line(7, "빅맥®", 6900, 2)]).expect("cart"));
        let before = state.cart.clone();

        let payload = line_payload(&line(7, "빅맥®", 6900, 1));
        let remove = call("call-1", "remove_burger_from_cart_tool", payload);
        let error =
            remove_from_cart(&mut state, &remove, &fixture.context()).expect_err("no match");

        assert!(matches!(error, DomainError::ItemNotFound { item_id: MenuItemId(7), .. }));
        assert_eq!(state.cart, before);
        assert!(state.messages().is_empty());

        let mut empty = ConversationState::new("thread-2");
        remove_from_cart(&mut empty, &remove, &fixture.context()).expect_err("no cart");
        assert!(empty.cart.is_none());
    }

    #[test]
    fn prepare_without_payload_answers_open_calls_and_asks_for_items() {
        let fixture = Fixture::new();
        let purchase = call("call-1", "purchase_burger_items", json!({}));
        let suggest = call("call-2", "suggest_burgers", json!({}));
        let mut state = ConversationState::with_messages(
            "thread-1",
            vec![Message::assistant_tool_calls(vec![purchase.clone(), suggest])],
        );

        let outcome = prepare_purchase(&mut state, &purchase, &fixture.context()).expect("prepare");

        assert_eq!(outcome, PrepareOutcome::MissingInformation);
        assert!(state.has_tool_result("call-1"));
        assert!(state.has_tool_result("call-2"));
        assert_eq!(
            state.last_message().and_then(Message::text),
            Some("Please provide the purchasing burgers to further process your order.")
        );
        assert!(state.cart.is_none());
        assert!(state.pending_approval.is_none());
    }

    #[test]
    fn prepare_replaces_cart_and_recomputes_totals() {
        let fixture = Fixture::new();
        let purchase = call(
            "call-1",
            "purchase_burger_items",
            json!({
                "purchase_information": {
                    "items": [
                        { "id": 7, "name": "빅맥®", "price": 6900, "quantity": 2 },
                        { "id": 18, "name": "치즈버거", "price": 5900, "quantity": 1 }
                    ],
                    "total_price": 1,
                    "total_items": 2,
                    "total_quantity": 3
                }
            }),
        );
        let mut state = ConversationState::with_messages(
            "thread-1",
            vec![Message::assistant_tool_calls(vec![purchase.clone()])],
        );
        state.cart =
            Some(Cart::from_lines(vec![line(1, "더블 1955® 버거", 7900, 5)]).expect("cart"));

        let outcome = prepare_purchase(&mut state, &purchase, &fixture.context()).expect("prepare");

        assert_eq!(outcome, PrepareOutcome::Prepared);
        let cart = state.cart.as_ref().expect("cart");
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.total_quantity(), 3);
        assert_eq!(cart.total_price(), Decimal::from(19700));
        let pending = state.pending_approval.as_ref().expect("pending approval");
        assert_eq!(pending.call_id, "call-1");
        assert!(!state.has_tool_result("call-1"));
    }

    #[test]
    fn execute_requires_a_cart() {
        let fixture = Fixture::new();
        let mut state = ConversationState::new("thread-1");

        let error = execute_purchase(&mut state, &fixture.context()).expect_err("no cart");
        assert_eq!(error, DomainError::NoActiveCart);
    }

    #[test]
    fn execute_emits_call_result_and_summary() {
        let fixture = Fixture::new();
        let mut state = ConversationState::new("thread-1");
        state.cart = Some(Cart::from_lines(vec![line(7, "빅맥®", 6900, 3)]).expect("cart"));

        let summary = execute_purchase(&mut state, &fixture.context()).expect("execute");

        assert!(summary.contains('3'));
        assert!(summary.contains("20700"));
        let messages = state.messages();
        assert_eq!(messages.len(), 3);
        let executed = &messages[0].tool_calls()[0];
        assert_eq!(executed.name, "execute_purchase");
        assert_eq!(executed.arguments["purchase_information"]["total_price"], json!("20700"));
        assert_eq!(messages[1].tool_call_id(), Some(executed.id.as_str()));
        assert_eq!(messages[1].text(), Some(r#"{"success":true}"#));
        assert_eq!(messages[2].text(), Some(summary.as_str()));
    }

    #[tokio::test]
    async fn run_tool_reports_unknown_tools_to_the_model() {
        let fixture = Fixture::new();
        let registry = ToolRegistry::with_defaults(MenuCatalog::burger_menu());
        let mut state = ConversationState::new("thread-1");

        let search = call("call-1", "search", json!({ "query": "burgers" }));
        run_tool(&mut state, &search, &registry, &fixture.context()).await;

        let content = state.last_message().and_then(Message::text).expect("tool result");
        assert!(content.starts_with("Error: search is not a valid tool"));

        let view_cart = call("call-2", "get_current_purchase_information", json!({}));
        run_tool(&mut state, &view_cart, &registry, &fixture.context()).await;
        assert_eq!(state.last_message().and_then(Message::text), Some("null"));
    }

    #[tokio::test]
    async fn invoke_model_renders_memories_into_the_system_prompt() {
        let fixture = Fixture::new();
        let memory = InMemoryMemoryStore::default();
        memory.put(&Namespace::memories("jack"), "likes", json!("spicy")).await.expect("put");
        let llm = ScriptedLlmClient::new([Message::assistant_text("How about a 맥스파이시?")]);
        let agent = AgentConfig {
            user_id: "jack".to_string(),
            system_prompt: "Order helper.{user_info}\nSystem Time: {time}".to_string(),
            ..AgentConfig::default()
        };
        let mut state = ConversationState::with_messages("thread-1", vec![Message::user("hi")]);

        invoke_model(&mut state, &llm, &memory, &agent, &fixture.context()).await.expect("invoke");

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system_prompt.contains("<memories>\n[likes]: spicy\n</memories>"));
        assert!(!requests[0].system_prompt.contains("{time}"));
        assert_eq!(requests[0].messages, vec![Message::user("hi")]);
        assert_eq!(requests[0].tools.len(), 5);
        assert_eq!(state.last_message().and_then(Message::text), Some("How about a 맥스파이시?"));

        let error = invoke_model(&mut state, &llm, &memory, &agent, &fixture.context())
            .await
            .expect_err("script exhausted");
        assert!(matches!(error, ApplicationError::Llm(_)));
    }
}
