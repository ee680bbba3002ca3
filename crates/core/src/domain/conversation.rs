use serde::{Deserialize, Serialize};

use crate::domain::cart::Cart;
use crate::domain::message::Message;

/// Purchase call waiting for the user's confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub call_id: String,
    pub tool_name: String,
}

/// Per-session conversation: an append-only message log plus the cart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    messages: Vec<Message>,
    pub cart: Option<Cart>,
    #[serde(default)]
    pub pending_approval: Option<PendingApproval>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), ..Self::default() }
    }

    pub fn with_messages(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self { session_id: session_id.into(), messages, ..Self::default() }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// The cart, created empty on first access.
    pub fn cart_mut(&mut self) -> &mut Cart {
        self.cart.get_or_insert_with(Cart::new)
    }

    pub fn has_tool_result(&self, call_id: &str) -> bool {
        self.messages.iter().any(|message| message.tool_call_id() == Some(call_id))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::message::{Message, ToolCall};

    use super::ConversationState;

    #[test]
    fn cart_is_created_lazily() {
        let mut state = ConversationState::new("thread-1");
        assert!(state.cart.is_none());

        assert!(state.cart_mut().is_empty());
        assert!(state.cart.is_some());
    }

    #[test]
    fn tracks_answered_tool_calls() {
        let mut state = ConversationState::new("thread-1");
        state.push(Message::assistant_tool_calls(vec![ToolCall::new(
            "call-9",
            "suggest_burgers",
            json!({}),
        )]));
        assert!(!state.has_tool_result("call-9"));

        state.push(Message::tool_result("call-9", None, "{}"));
        assert!(state.has_tool_result("call-9"));
        assert!(state.last_message().is_some_and(Message::is_tool_result));
    }
}
