use std::sync::Arc;

use orderly_agent::llm::OpenAiCompatibleClient;
use orderly_agent::memory::InMemoryMemoryStore;
use orderly_agent::runtime::{AgentRuntime, TurnOutcome};
use orderly_core::config::{AppConfig, ConfigOverrides, InvocationConfig, LoadOptions};
use orderly_core::domain::conversation::ConversationState;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::commands::{CommandEnvelope, CommandResult};
use crate::logging::init_logging;

const GREETING: &str = "orderly: ask for the menu, add burgers to your cart, or place an order. \
                        /cart, /remember key: value, /quit\n";

#[derive(Debug, Clone, Default)]
pub struct ChatArgs {
    pub thread: Option<String>,
    pub user_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Quit,
    Cart,
    Remember { key: &'a str, value: &'a str },
    Message(&'a str),
}

fn parse_input(input: &str) -> ChatInput<'_> {
    match input {
        "/quit" | "/exit" => ChatInput::Quit,
        "/cart" => ChatInput::Cart,
        _ => match input.strip_prefix("/remember ").and_then(|rest| rest.split_once(':')) {
            Some((key, value)) => ChatInput::Remember { key: key.trim(), value: value.trim() },
            None => ChatInput::Message(input),
        },
    }
}

pub fn run(args: ChatArgs) -> CommandResult {
    let config = match AppConfig::load(LoadOptions {
        overrides: ConfigOverrides {
            user_id: args.user_id,
            model: args.model,
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    init_logging(&config);

    let llm = match OpenAiCompatibleClient::from_config(&config) {
        Ok(llm) => llm,
        Err(error) => {
            return CommandResult::failure("chat", "llm_client", format!("{error:#}"), 3);
        }
    };
    let agent_runtime = AgentRuntime::new(
        config.agent.clone(),
        Arc::new(llm),
        Arc::new(InMemoryMemoryStore::default()),
    );
    let thread_id = args.thread.unwrap_or_else(|| Uuid::new_v4().to_string());

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                4,
            );
        }
    };

    let result = runtime.block_on(chat_loop(
        &agent_runtime,
        &thread_id,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    ));

    match result {
        Ok(summary) => CommandEnvelope::ok("chat", "conversation closed")
            .with_conversation(&thread_id, summary.turns)
            .with_cart(summary.final_state.as_ref().and_then(|state| state.cart.as_ref()))
            .finish(0),
        Err(error) => CommandResult::failure("chat", "io", format!("{error:#}"), 5),
    }
}

#[derive(Debug)]
pub struct ChatSummary {
    pub turns: usize,
    /// State of the thread when the loop ended, if any turn ran.
    pub final_state: Option<ConversationState>,
}

/// Reads user lines until EOF or `/quit`, running one turn per line. The
/// thread's session is ended when the loop stops.
pub async fn chat_loop<R, W>(
    runtime: &AgentRuntime,
    thread_id: &str,
    reader: R,
    mut writer: W,
) -> anyhow::Result<ChatSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut turns = 0;

    writer.write_all(GREETING.as_bytes()).await?;

    loop {
        writer.write_all(b"> ").await?;
        writer.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let reply = match parse_input(input) {
            ChatInput::Quit => break,
            ChatInput::Cart => {
                match runtime.snapshot(thread_id).await.and_then(|state| state.cart) {
                    Some(cart) => serde_json::to_string_pretty(&cart)?,
                    None => "your cart is empty".to_string(),
                }
            }
            ChatInput::Remember { key, value } => {
                let user_id = runtime
                    .config()
                    .resolve_for_invocation(&InvocationConfig::default())
                    .map(|agent| agent.user_id)
                    .unwrap_or_else(|_| runtime.config().user_id.clone());
                match runtime.remember(&user_id, key, json!(value)).await {
                    Ok(()) => format!("remembered {key} for {user_id}"),
                    Err(error) => {
                        error.into_interface(Uuid::new_v4().to_string()).user_message().to_string()
                    }
                }
            }
            ChatInput::Message(text) => {
                turns += 1;
                match runtime.handle_thread_message(thread_id, text).await {
                    Ok(TurnOutcome::Completed { reply: None }) => "(no reply)".to_string(),
                    Ok(outcome) => outcome.reply_text().to_string(),
                    Err(error) => {
                        let correlation_id = Uuid::new_v4().to_string();
                        tracing::warn!(
                            event_name = "cli.chat.turn_failed",
                            session_id = %thread_id,
                            correlation_id = %correlation_id,
                            error = %error,
                            "turn failed"
                        );
                        let interface = error.into_interface(correlation_id.clone());
                        format!("{} (ref {correlation_id})", interface.user_message())
                    }
                }
            }
        };

        writer.write_all(format!("assistant: {reply}\n").as_bytes()).await?;
    }

    writer.flush().await?;
    let final_state = runtime.end_session(thread_id).await;
    Ok(ChatSummary { turns, final_state })
}

#[cfg(test)]
mod tests {
    use super::{parse_input, ChatInput};

    #[test]
    fn slash_commands_are_recognized() {
        assert_eq!(parse_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_input("/cart"), ChatInput::Cart);
        assert_eq!(
            parse_input("/remember likes: spicy burgers"),
            ChatInput::Remember { key: "likes", value: "spicy burgers" }
        );
        assert_eq!(parse_input("/remember nothing"), ChatInput::Message("/remember nothing"));
        assert_eq!(parse_input("빅맥 하나"), ChatInput::Message("빅맥 하나"));
    }
}
