//! agent-chat: terminal client for a streaming agent server

use agent_session::config::ClientConfig;
use agent_session::session::{ConversationState, Role, SessionController, ToolStatus};
use agent_session::transport::{AgentTransport, HttpTransport, LoggingTransport};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Transport = Arc<LoggingTransport<HttpTransport>>;
type Controller = SessionController<Transport>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they never interleave with the reply on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_session=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        server_url = %config.server_url,
        agent_id = %config.agent_id,
        streaming = config.streaming,
        "Starting agent-chat"
    );

    let transport: Transport = Arc::new(LoggingTransport::new(HttpTransport::new(&config)?));
    match transport.health().await {
        Ok(health) => tracing::info!(status = %health.status, "Agent server reachable"),
        Err(e) => tracing::warn!(error = %e.message, "Agent server health check failed"),
    }
    let session: Arc<Controller> = Arc::new(SessionController::new(
        Arc::clone(&transport),
        &config.user_id,
    ));

    let renderer = tokio::spawn(render(session.subscribe()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if session.snapshot().is_loading() {
                    session.stop();
                    continue;
                }
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let text = line.trim();

        match text {
            "" => {}
            "/quit" => break,
            "/stop" => session.stop(),
            "/clear" => match session.clear().await {
                Ok(()) => println!("(conversation cleared)"),
                Err(e) => eprintln!("{e}"),
            },
            "/agents" => match transport.list_agents().await {
                Ok(list) => {
                    for agent in &list.agents {
                        let marker = if *agent == config.agent_id { '*' } else { ' ' };
                        println!("{marker} {agent}");
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            "/info" => match transport.agent_details(&config.agent_id).await {
                Ok(details) => {
                    println!("{} ({})", details.name, details.model);
                    if !details.description.is_empty() {
                        println!("{}", details.description);
                    }
                    for tool in &details.tools {
                        println!("  tool: {}", tool.name);
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            _ => {
                let session = Arc::clone(&session);
                let text = text.to_string();
                let streaming = config.streaming;
                tokio::spawn(async move {
                    if let Err(e) = session.send(&text, streaming).await {
                        eprintln!("{e}");
                    }
                });
            }
        }
    }

    session.stop();
    renderer.abort();
    Ok(())
}

/// Print reply text as it grows, plus one line per tool status change
async fn render(rx: tokio::sync::watch::Receiver<ConversationState>) {
    let mut snapshots = WatchStream::new(rx);
    let mut printed: HashMap<String, usize> = HashMap::new();
    let mut finished: HashSet<String> = HashSet::new();
    let mut tools: HashMap<String, ToolStatus> = HashMap::new();
    let mut last_error: Option<String> = None;
    let mut stdout = std::io::stdout();

    while let Some(state) = snapshots.next().await {
        for exec in state.tools.iter() {
            if tools.insert(exec.id.clone(), exec.status) == Some(exec.status) {
                continue;
            }
            match exec.status {
                ToolStatus::Pending | ToolStatus::Running => println!("\n[tool] {} running", exec.name),
                ToolStatus::Completed => println!(
                    "\n[tool] {} completed in {} ms",
                    exec.name,
                    exec.duration_ms.unwrap_or_default()
                ),
                ToolStatus::Error => println!(
                    "\n[tool] {} failed: {}",
                    exec.name,
                    exec.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }

        for message in state.messages.iter().filter(|m| m.role == Role::Assistant) {
            let seen = printed.entry(message.id.clone()).or_default();
            if let Some(delta) = message.content.get(*seen..) {
                if !delta.is_empty() {
                    print!("{delta}");
                    *seen = message.content.len();
                }
            }
            if !message.streaming && finished.insert(message.id.clone()) {
                println!();
            }
        }
        let _ = stdout.flush();

        if state.error != last_error {
            if let Some(error) = &state.error {
                eprintln!("error: {error}");
            }
            last_error.clone_from(&state.error);
        }
    }
}
