use std::path::Path;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use wirecell_core::{Event, GraphConfig, Response, RuntimeSettings};
use wirecell_primitives::builtin_types;
use wirecell_runtime::{Agent, CancellationToken, Hub};

#[derive(Debug, Clone, Copy)]
pub enum TraceFormat {
    Text,
    Json,
}

pub async fn run(
    settings: &RuntimeSettings,
    graph: &Path,
    text: Option<String>,
    method: Option<String>,
    payload: &str,
    trace: Option<TraceFormat>,
) -> anyhow::Result<()> {
    let config = GraphConfig::load(graph)
        .with_context(|| format!("failed to load {}", graph.display()))?;
    let agent_id = config.id.clone();

    let mut hub = Hub::with_settings(builtin_types(), settings);
    hub.register_agent(config)?;

    let printer = trace.map(|format| {
        let (subscription, rx) = hub.bus().subscribe_channel("", settings.event_channel_capacity);
        (subscription, tokio::spawn(print_events(rx, format)))
    });

    let agent = hub.get_agent(&agent_id)?;
    debug!(agent = %agent, "Agent built");

    let outcome = match (text, method) {
        (Some(text), _) => send_text(&agent, &text).await,
        (None, Some(method)) => invoke(&agent, &method, payload).await,
        (None, None) => interactive(&agent).await,
    };

    if let Some((subscription, handle)) = printer {
        hub.unregister_event_listener(subscription);
        drop(agent);
        if let Err(e) = handle.await {
            warn!(error = %e, "Trace printer failed");
        }
    }

    outcome
}

async fn send_text(agent: &Agent, text: &str) -> anyhow::Result<()> {
    let response = agent.handle_text(text).await?;
    print_response(&response);
    Ok(())
}

async fn invoke(agent: &Agent, method: &str, payload: &str) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("--payload is not valid JSON")?;
    let result = agent.invoke_entry(method, payload).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn interactive(agent: &Agent) -> anyhow::Result<()> {
    println!("{}", agent);
    println!("Type a message, /quit to exit. Ctrl+C cancels a running request.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let token = CancellationToken::new();
        let canceller = token.clone();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                canceller.cancel();
            }
        });

        let outcome = agent.handle_text_cancellable(line, token).await;
        watcher.abort();

        match outcome {
            Ok(response) => print_response(&response),
            Err(e) if e.is_cancelled() => println!("(cancelled)"),
            Err(e) => eprintln!("Error: {}", e),
        }
    }
    Ok(())
}

fn print_response(response: &Response) {
    if response.is_empty() {
        println!("(empty response)");
        return;
    }
    if let Some(text) = &response.text {
        println!("{}", text);
    }
    for attachment in &response.attachments {
        println!("[{:?} attachment, {} bytes]", attachment.file_type, attachment.content.len());
    }
}

async fn print_events(mut rx: mpsc::Receiver<Event>, format: TraceFormat) {
    while let Some(event) = rx.recv().await {
        match format {
            TraceFormat::Json => match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{}", line),
                Err(e) => warn!(error = %e, "Unserializable event"),
            },
            TraceFormat::Text => eprintln!("{}", describe(&event)),
        }
    }
}

fn describe(event: &Event) -> String {
    let mut line = format!(
        "{} {} -> {}.{} [{}]",
        event.time.format("%H:%M:%S%.3f"),
        event.caller_id,
        event.module_id,
        event.method,
        event.event_type,
    );
    if let Some(ms) = event.duration_ms {
        line.push_str(&format!(" {}ms", ms));
    }
    if let Some(error) = &event.error {
        line.push_str(&format!(" error: {}", error.message));
    }
    line
}
