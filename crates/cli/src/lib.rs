pub mod commands;
pub mod logging;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "orderly",
    about = "Burger ordering assistant CLI",
    long_about = "Chat with the ordering assistant, browse the menu, \
                  and inspect effective configuration.",
    after_help = "Examples:\n  orderly chat --user-id jack\n  orderly menu --json\n  orderly config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive ordering conversation on stdin/stdout")]
    Chat {
        #[arg(long, help = "Conversation thread id (defaults to a fresh id)")]
        thread: Option<String>,
        #[arg(long, help = "User whose memories and cart the conversation uses")]
        user_id: Option<String>,
        #[arg(long, help = "Model in provider/model-name form, e.g. ollama/llama3.1")]
        model: Option<String>,
    },
    #[command(about = "Print the burger menu and add-on options")]
    Menu {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat { thread, user_id, model } => {
            commands::chat::run(commands::chat::ChatArgs { thread, user_id, model })
        }
        Command::Menu { json } => {
            commands::CommandResult { exit_code: 0, output: commands::menu::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
