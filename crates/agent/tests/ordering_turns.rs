use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::{json, Value};

use orderly_agent::llm::ScriptedLlmClient;
use orderly_agent::memory::InMemoryMemoryStore;
use orderly_agent::runtime::{AgentRuntime, TurnOutcome};
use orderly_core::audit::InMemoryAuditSink;
use orderly_core::config::{AgentConfig, InvocationConfig};
use orderly_core::domain::message::{Message, ToolCall};
use orderly_core::errors::{ApplicationError, DomainError, InterfaceError};

fn big_mac(quantity: u32) -> Value {
    json!({ "id": 7, "name": "빅맥®", "price": 6900, "quantity": quantity })
}

fn cheeseburger(quantity: u32) -> Value {
    json!({ "id": 18, "name": "치즈버거", "price": 5900, "quantity": quantity })
}

fn calls(requested: &[(&str, &str, Value)]) -> Message {
    Message::assistant_tool_calls(
        requested
            .iter()
            .map(|(id, name, arguments)| ToolCall::new(*id, *name, arguments.clone()))
            .collect(),
    )
}

fn add_call(id: &'static str, item: Value) -> (&'static str, &'static str, Value) {
    (id, "add_burger_to_cart_tool", json!({ "purchase_burger_item": item }))
}

fn remove_call(id: &'static str, item: Value) -> (&'static str, &'static str, Value) {
    (id, "remove_burger_from_cart_tool", json!({ "purchase_burger_item": item }))
}

struct Harness {
    llm: ScriptedLlmClient,
    sink: InMemoryAuditSink,
    runtime: AgentRuntime,
}

fn harness(responses: Vec<Message>) -> Harness {
    let llm = ScriptedLlmClient::new(responses);
    let sink = InMemoryAuditSink::default();
    let runtime = AgentRuntime::new(
        AgentConfig::default(),
        Arc::new(llm.clone()),
        Arc::new(InMemoryMemoryStore::default()),
    )
    .with_audit_sink(Arc::new(sink.clone()));
    Harness { llm, sink, runtime }
}

#[tokio::test]
async fn add_to_cart_then_model_replies() {
    let h = harness(vec![
        calls(&[add_call("call-1", big_mac(2))]),
        Message::assistant_text("빅맥 2개를 담았어요!"),
    ]);

    let outcome = h
        .runtime
        .handle_thread_message_with(
            "thread-1",
            "빅맥 두 개 담아줘",
            &InvocationConfig::new().with("user_id", "jack"),
        )
        .await
        .expect("turn");

    assert_eq!(outcome.reply_text(), "빅맥 2개를 담았어요!");
    let state = h.runtime.snapshot("thread-1").await.expect("session");
    let cart = state.cart.as_ref().expect("cart");
    assert_eq!(cart.total_items(), 1);
    assert_eq!(cart.total_quantity(), 2);
    assert_eq!(cart.total_price(), Decimal::from(13800));

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 2);
    let acknowledgement = requests[1].messages.last().and_then(Message::text);
    assert_eq!(acknowledgement, Some("Successfully added 빅맥® to jack's cart."));
}

#[tokio::test]
async fn fan_out_runs_each_call_in_request_order() {
    let h = harness(vec![
        calls(&[
            add_call("call-1", cheeseburger(1)),
            add_call("call-2", big_mac(1)),
            remove_call("call-3", cheeseburger(1)),
            ("call-4", "get_current_purchase_information", json!({})),
        ]),
        Message::assistant_text("done"),
    ]);

    h.runtime.handle_thread_message("thread-1", "swap my burger").await.expect("turn");

    let state = h.runtime.snapshot("thread-1").await.expect("session");
    let cart = state.cart.as_ref().expect("cart");
    assert_eq!(cart.lines().len(), 1);
    assert_eq!(cart.total_price(), Decimal::from(6900));

    let results = state
        .messages()
        .iter()
        .filter_map(Message::tool_call_id)
        .collect::<Vec<_>>();
    assert_eq!(results, vec!["call-1", "call-2", "call-3", "call-4"]);

    let cart_view: Value = serde_json::from_str(
        state.messages()[5].text().expect("cart tool result"),
    )
    .expect("cart json");
    assert_eq!(cart_view["total_items"], json!("1"));
}

#[tokio::test]
async fn purchase_waits_for_approval_then_executes() {
    let h = harness(vec![calls(&[(
        "call-1",
        "purchase_burger_items",
        json!({ "purchase_information": { "items": [big_mac(3)], "total_price": 20700 } }),
    )])]);

    let prepared =
        h.runtime.handle_thread_message("thread-1", "buy 3 big macs").await.expect("turn");
    let TurnOutcome::AwaitingApproval { cart, prompt } = &prepared else {
        panic!("expected approval prompt, got {prepared:?}");
    };
    assert_eq!(cart.total_quantity(), 3);
    assert!(prompt.contains("20700"));

    let state = h.runtime.snapshot("thread-1").await.expect("session");
    assert_eq!(
        state.pending_approval.as_ref().map(|pending| pending.call_id.as_str()),
        Some("call-1")
    );

    let purchased = h.runtime.handle_thread_message("thread-1", "Y").await.expect("turn");
    assert_eq!(
        purchased,
        TurnOutcome::Purchased {
            summary: "Successfully purchased 3 items for a total of 20700 KRW.".to_string()
        }
    );
    assert_eq!(h.llm.requests().len(), 1);

    let state = h.runtime.snapshot("thread-1").await.expect("session");
    assert!(state.pending_approval.is_none());
    assert!(state.has_tool_result("call-1"));
    assert!(state.cart.is_some());

    let event_types = h.sink.events().into_iter().map(|event| event.event_type).collect::<Vec<_>>();
    assert!(event_types.contains(&"purchase.prepared".to_string()));
    assert!(event_types.contains(&"purchase.approval_decided".to_string()));
    assert!(event_types.contains(&"purchase.executed".to_string()));
}

#[tokio::test]
async fn declining_the_purchase_goes_back_to_the_model() {
    let h = harness(vec![
        calls(&[(
            "call-1",
            "purchase_burger_items",
            json!({ "purchase_information": { "items": [big_mac(1)] } }),
        )]),
        Message::assistant_text("No problem. Anything else?"),
    ]);

    h.runtime.handle_thread_message("thread-1", "buy it").await.expect("turn");
    let outcome = h.runtime.handle_thread_message("thread-1", "no").await.expect("turn");

    assert_eq!(outcome.reply_text(), "No problem. Anything else?");
    let requests = h.llm.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.last().and_then(Message::text), Some("no"));

    let state = h.runtime.snapshot("thread-1").await.expect("session");
    assert!(state.pending_approval.is_none());
}

#[tokio::test]
async fn purchase_without_items_asks_the_user_and_ends_the_turn() {
    let h = harness(vec![calls(&[("call-1", "purchase_burger_items", json!({}))])]);

    let outcome = h.runtime.handle_thread_message("thread-1", "buy").await.expect("turn");

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            reply: Some(
                "Please provide the purchasing burgers to further process your order.".to_string()
            )
        }
    );
    let state = h.runtime.snapshot("thread-1").await.expect("session");
    assert!(state.has_tool_result("call-1"));
    assert!(state.pending_approval.is_none());
    assert_eq!(h.llm.requests().len(), 1);
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let h = harness(vec![
        calls(&[("call-1", "search", json!({ "query": "burger trends" }))]),
        Message::assistant_text("I can't search the web, but here is our menu."),
    ]);

    let outcome =
        h.runtime.handle_thread_message("thread-1", "what's trending?").await.expect("turn");

    assert_eq!(outcome.reply_text(), "I can't search the web, but here is our menu.");
    let requests = h.llm.requests();
    let tool_result = requests[1].messages.last().and_then(Message::text).expect("tool result");
    assert!(tool_result.starts_with("Error: search is not a valid tool"));
}

#[tokio::test]
async fn failed_removal_aborts_the_turn_and_keeps_the_session() {
    let h = harness(vec![
        calls(&[add_call("call-1", big_mac(2))]),
        Message::assistant_text("added"),
        calls(&[remove_call("call-2", big_mac(1))]),
    ]);

    h.runtime.handle_thread_message("thread-1", "two big macs").await.expect("turn");
    let before = h.runtime.snapshot("thread-1").await.expect("session");

    let error =
        h.runtime.handle_thread_message("thread-1", "remove one").await.expect_err("no match");

    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::ItemNotFound { ref name, .. }) if name == "빅맥®"
    ));
    assert!(matches!(error.clone().into_interface("turn-9"), InterfaceError::BadRequest { .. }));
    assert_eq!(h.runtime.snapshot("thread-1").await, Some(before));
}

#[tokio::test]
async fn malformed_arguments_are_rejected() {
    let h = harness(vec![calls(&[(
        "call-1",
        "add_burger_to_cart_tool",
        json!({ "purchase_burger_item": { "name": "빅맥®" } }),
    )])]);

    let error = h.runtime.handle_thread_message("thread-1", "add").await.expect_err("invalid");

    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::InvalidToolArguments { ref tool_name, .. })
            if tool_name == "add_burger_to_cart_tool"
    ));
}

#[tokio::test]
async fn remembered_facts_reach_the_system_prompt() {
    let h = harness(vec![Message::assistant_text("Spicy it is!")]);
    h.runtime.remember("default", "likes", json!("spicy burgers")).await.expect("remember");

    h.runtime.handle_thread_message("thread-1", "recommend something").await.expect("turn");

    let requests = h.llm.requests();
    assert!(requests[0].system_prompt.contains("[likes]: spicy burgers"));
}

#[tokio::test]
async fn concurrent_sessions_do_not_share_carts() {
    let h = harness(vec![
        calls(&[add_call("call-a", big_mac(1))]),
        Message::assistant_text("ok"),
        calls(&[add_call("call-b", cheeseburger(4))]),
        Message::assistant_text("ok"),
    ]);

    let (first, second) = tokio::join!(
        h.runtime.handle_thread_message("thread-a", "one big mac"),
        h.runtime.handle_thread_message("thread-b", "four cheeseburgers"),
    );
    first.expect("first turn");
    second.expect("second turn");

    let mut quantities = Vec::new();
    for thread in ["thread-a", "thread-b"] {
        let state = h.runtime.snapshot(thread).await.expect("session");
        quantities.push(state.cart.as_ref().map(|cart| cart.total_quantity()).unwrap_or_default());
    }
    quantities.sort_unstable();
    assert_eq!(quantities, vec![1, 4]);
}

#[tokio::test]
async fn overflowing_cart_totals_abort_the_turn_and_restore_the_session() {
    let huge_price = json!({
        "id": 7,
        "name": "빅맥®",
        "price": "79228162514264337593543950335",
        "quantity": 2
    });
    let h = harness(vec![
        calls(&[
            add_call("call-1", big_mac(3_000_000_000)),
            add_call("call-2", big_mac(3_000_000_000)),
        ]),
        calls(&[(
            "call-3",
            "purchase_burger_items",
            json!({ "purchase_information": { "items": [huge_price] } }),
        )]),
    ]);

    let error = h.runtime.handle_thread_message("thread-1", "lots").await.expect_err("overflow");
    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::CartTotalsOverflow { ref name, .. })
            if name == "빅맥®"
    ));
    let state = h.runtime.snapshot("thread-1").await.expect("session");
    assert!(state.messages().is_empty());
    assert!(state.cart.is_none());

    let error = h.runtime.handle_thread_message("thread-2", "buy").await.expect_err("overflow");
    assert!(matches!(error, ApplicationError::Domain(DomainError::CartTotalsOverflow { .. })));
    let state = h.runtime.snapshot("thread-2").await.expect("session");
    assert!(state.messages().is_empty());
    assert!(state.pending_approval.is_none());
}
