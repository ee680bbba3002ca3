pub mod chat;
pub mod config;
pub mod menu;

use orderly_core::domain::cart::Cart;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        CommandEnvelope::ok(command, message).finish(0)
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        CommandEnvelope::error(command, error_class, message).finish(exit_code)
    }
}

/// Single-line JSON summary printed when a command exits. Conversation
/// fields are present only for `chat`.
#[derive(Debug, Serialize)]
pub struct CommandEnvelope {
    command: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    turns: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cart: Option<CartSummary>,
}

#[derive(Debug, Serialize)]
struct CartSummary {
    total_items: u32,
    total_quantity: u32,
    total_price: String,
}

impl CommandEnvelope {
    pub fn ok(command: &str, message: impl Into<String>) -> Self {
        Self {
            command: command.to_string(),
            status: "ok",
            error_class: None,
            message: message.into(),
            thread_id: None,
            turns: None,
            cart: None,
        }
    }

    pub fn error(command: &str, error_class: &str, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            error_class: Some(error_class.to_string()),
            ..Self::ok(command, message)
        }
    }

    pub fn with_conversation(mut self, thread_id: &str, turns: usize) -> Self {
        self.thread_id = Some(thread_id.to_string());
        self.turns = Some(turns);
        self
    }

    pub fn with_cart(mut self, cart: Option<&Cart>) -> Self {
        self.cart = cart.map(|cart| CartSummary {
            total_items: cart.total_items(),
            total_quantity: cart.total_quantity(),
            total_price: cart.total_price().normalize().to_string(),
        });
        self
    }

    pub fn finish(self, exit_code: u8) -> CommandResult {
        let output = serde_json::to_string(&self).unwrap_or_else(|error| {
            json!({
                "command": self.command,
                "status": "error",
                "error_class": "serialization",
                "message": error.to_string(),
            })
            .to_string()
        });
        CommandResult { exit_code, output }
    }
}
