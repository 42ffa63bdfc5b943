use anyhow::{Context, Result};
use relay_agent::model;
use relay_agent::{AgentEvent, AgentLoop, SseToolClient};
use relay_core::config::AppConfig;
use relay_core::gateway::ToolGateway;
use relay_core::types::{Author, ToolCatalog, TurnOrigin};
use rustyline::error::ReadlineError;
use rustyline::{Config as RlConfig, DefaultEditor};
use std::sync::Arc;
use tokio::sync::mpsc;

const BANNER: &str = r#"
  ╔═══════════════════════════════════════════╗
  ║             tool-relay v0.1.0             ║
  ║   Chat with a model that can call tools   ║
  ╚═══════════════════════════════════════════╝

  Type your message and press Enter to chat.
  Type exit or quit to leave, /help for commands.
"#;

/// Run the interactive chat against the tool server in `config.client`.
pub async fn run(config: AppConfig) -> Result<()> {
    let model = model::from_config(&config.provider)?;
    let client = Arc::new(
        SseToolClient::connect(&config.client)
            .await
            .with_context(|| {
                format!("could not reach tool server at {}", config.client.server_url)
            })?,
    );

    println!("{}", BANNER);
    println!(
        "  Model: {}  |  Tools: {} from {}",
        config.provider.model,
        client.tools().len(),
        config.client.server_url
    );
    println!();

    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let catalog = ToolCatalog::new(client.tools());
    let mut agent = AgentLoop::new(model, client.clone(), catalog, &config.agent).with_events(tx);

    let rl_config = RlConfig::builder().auto_add_history(true).build();
    let history_path = AppConfig::data_dir().join("repl_history.txt");
    let mut rl = DefaultEditor::with_config(rl_config)?;
    let _ = rl.load_history(&history_path);
    let mut warned_disconnect = false;

    loop {
        match rl.readline("You: ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if is_exit(input) {
                    println!("Goodbye!");
                    break;
                }
                if input.starts_with('/') {
                    handle_command(input, &agent, &config)?;
                    continue;
                }

                if !client.is_connected() && !warned_disconnect {
                    println!("\x1b[0;31m  Tool server connection lost; tool calls will fail.\x1b[0m");
                    warned_disconnect = true;
                }
                if client.take_catalog_change() {
                    match client.list_tools().await {
                        Ok(tools) => agent.set_catalog(ToolCatalog::new(tools)),
                        Err(e) => tracing::warn!(error = %e, "Could not refresh tool list"),
                    }
                }

                let respond = agent.respond(input);
                tokio::pin!(respond);
                let result = loop {
                    tokio::select! {
                        result = &mut respond => break result,
                        Some(event) = rx.recv() => print_event(event),
                    }
                };
                while let Ok(event) = rx.try_recv() {
                    print_event(event);
                }

                match result {
                    Ok(reply) => println!("\x1b[1;33mAgent\x1b[0m: {}", reply),
                    Err(e) => eprintln!("\x1b[0;31mError: {}\x1b[0m", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = rl.save_history(&history_path);
    client.close();

    Ok(())
}

fn is_exit(input: &str) -> bool {
    let word = input.strip_prefix('/').unwrap_or(input);
    word.eq_ignore_ascii_case("exit") || word.eq_ignore_ascii_case("quit")
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::ToolCallStarted { name, .. } => {
            println!("  \x1b[0;35m⚡ Calling tool {}\x1b[0m", name);
        }
        AgentEvent::ToolCallFinished { text, is_error, .. } => {
            let status = if is_error {
                "\x1b[0;31m✗\x1b[0m"
            } else {
                "\x1b[0;32m✓\x1b[0m"
            };
            let preview: String = if text.chars().count() > 200 {
                format!("{}...", text.chars().take(200).collect::<String>())
            } else {
                text
            };
            println!("  {} {}", status, preview.replace('\n', "\n    "));
        }
        // Printed by the caller from the returned result.
        AgentEvent::Reply(_) | AgentEvent::ModelFailed(_) => {}
    }
}

fn handle_command(input: &str, agent: &AgentLoop, config: &AppConfig) -> Result<()> {
    let cmd = input.split_whitespace().next().unwrap_or(input);

    match cmd {
        "/tools" => {
            let tools = agent.catalog().descriptors();
            if tools.is_empty() {
                println!("  No tools available.");
            } else {
                println!("  Available tools ({}):", tools.len());
                for tool in tools {
                    println!("    • {} — {}", tool.name, tool.description);
                }
            }
        }
        "/history" => {
            for turn in agent.conversation().snapshot() {
                let who = match turn.author {
                    Author::System => "system",
                    Author::User(TurnOrigin::HumanInput) => "you",
                    Author::User(TurnOrigin::ToolResult) => "tool",
                    Author::Model => "model",
                };
                println!("  [{}] {}", who, turn.text());
            }
        }
        "/config" => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        "/help" | "/?" => {
            println!("  /tools         — List available tools");
            println!("  /history       — Show the conversation so far");
            println!("  /config        — Show current config");
            println!("  /help          — Show this help");
            println!("  exit, quit     — Quit");
        }
        _ => {
            println!(
                "Unknown command: {}. Type /help for available commands.",
                cmd
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_words_ignore_case() {
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(is_exit("Exit"));
        assert!(!is_exit("exit now"));
        assert!(is_exit("/exit"));
        assert!(!is_exit("exits"));
    }
}
