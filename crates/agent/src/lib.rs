//! Agent runtime for the burger ordering assistant.
//!
//! One user turn runs a small graph:
//! 1. **Model call** (`handlers::invoke_model`) - recall memories, render the
//!    system prompt, ask the LLM for the next assistant message
//! 2. **Routing** (`orderly_core::flows`) - map requested tool calls to steps
//! 3. **Step handlers** (`handlers`) - cart mutations, purchase preparation and
//!    execution, generic tools from the `tools` registry
//! 4. **Approval** - the turn suspends after a prepared purchase and resumes
//!    with the user's answer
//!
//! # Key Types
//!
//! - `AgentRuntime` - owns sessions and drives turns (see `runtime`)
//! - `LlmClient` - chat-completion boundary with an OpenAI-compatible client
//! - `MemoryStore` - recalled facts about the user
//!
//! # Safety Principle
//!
//! The LLM only requests actions. Cart totals are always recomputed from the
//! cart lines, never taken from the model.

pub mod handlers;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod runtime;
pub mod tools;
