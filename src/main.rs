use clap::Parser;
use futures::StreamExt;
use maestro::agents::{Orchestrator, StreamEvent};
use maestro::cli::Cli;
use maestro::config::Settings;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::info;

const HELP: &str = "Commands: /history /clear /save /cache [clear] /metrics /status /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they do not interleave with streamed replies
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let settings = Settings::new_with_cli(&cli)?;
    let orchestrator = Orchestrator::from_settings(&settings).await?;

    info!(
        "Starting Maestro with {} ({}), session '{}'",
        settings.llm.model, settings.llm.provider, cli.session
    );
    println!("Maestro ready. {}", HELP);

    let mut lines = input_lines(BufReader::new(tokio::io::stdin()));
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next().await else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('/') {
            if !run_command(&orchestrator, input).await? {
                break;
            }
            continue;
        }

        if cli.no_stream {
            match orchestrator.chat(input, &cli.session).await {
                Ok(reply) => println!("{}\n", reply),
                Err(e) => eprintln!("{}", e),
            }
        } else {
            match orchestrator.chat_streaming(input, &cli.session).await {
                Ok(events) => print_stream(events).await?,
                Err(e) => eprintln!("{}", e),
            }
        }
    }

    orchestrator.shutdown().await
}

fn input_lines<R: AsyncBufRead>(reader: R) -> LinesStream<R> {
    LinesStream::new(reader.lines())
}

/// Returns `false` when the user asked to quit
async fn run_command(orchestrator: &Orchestrator, command: &str) -> anyhow::Result<bool> {
    match command {
        "/quit" | "/exit" => return Ok(false),
        "/history" => {
            let history = orchestrator.conversation_history().await;
            println!("{}", history.recent_context);
            println!("{}", serde_json::to_string_pretty(&history.stats)?);
        }
        "/clear" => {
            orchestrator.clear_conversation_history().await;
            println!("Conversation history cleared.");
        }
        "/save" => {
            if orchestrator.save_conversation_history().await {
                println!("Conversation history saved.");
            } else {
                println!("Conversation history was not saved.");
            }
        }
        "/cache" => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.cache_stats().await)?);
        }
        "/cache clear" => {
            orchestrator.clear_cache().await;
            println!("Response cache cleared.");
        }
        "/metrics" => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.metrics())?);
        }
        "/status" => {
            for (kind, health) in orchestrator.agent_status() {
                println!("{:<12} {}", kind, health);
            }
            println!("{}", serde_json::to_string_pretty(&orchestrator.info().await)?);
        }
        _ => println!("Unknown command. {}", HELP),
    }
    Ok(true)
}

async fn print_stream(mut events: maestro::agents::EventStream) -> anyhow::Result<()> {
    let mut last_agent_output = String::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Status { content, .. } => eprintln!("[{}]", content),
            StreamEvent::Chunk { content, .. } => {
                print!("{}", content);
                stdout.flush()?;
            }
            StreamEvent::Complete { content, agent: Some(_) } => {
                println!();
                last_agent_output = content;
            }
            StreamEvent::Complete { content, agent: None } => {
                // the final reply only differs from the last step when notes or context were added
                if content != last_agent_output {
                    println!("\n{}", content);
                }
                println!();
            }
            StreamEvent::Error { content, agent: Some(agent) } => eprintln!("\n[{} failed] {}", agent, content),
            StreamEvent::Error { content, agent: None } => println!("\n{}\n", content),
        }
    }
    Ok(())
}
