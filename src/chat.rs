// Interactive terminal host for a coaching session.
// Session events are rendered by a background task; the input loop only drives turns.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::coach::{CoachSession, TurnOutcome};
use crate::events::SessionEvent;
use crate::model_client::ChatBackend;
use crate::phase::Phase;
use crate::session::{Sender, SessionSnapshot};

const HELP_TEXT: &str = "Commands: /status shows progress, /restart starts over, /quit leaves. Ctrl-C stops a response.";

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

fn phase_indicator(phase: Phase) -> String {
    let (index, total) = phase.progress();
    format!("{} ({}/{})", phase.label(), (index + 1).min(total), total)
}

/// One-screen summary of where the session stands.
pub fn format_status(snapshot: &SessionSnapshot) -> String {
    let mut lines = vec![format!("Phase: {}", phase_indicator(snapshot.phase))];
    let data = &snapshot.data;
    lines.push(format!("Energizers: {}", data.energizers.len()));
    lines.push(format!("Drainers: {}", data.drainers.len()));
    lines.push(format!("Stories: {}", data.stories.len()));
    if !data.patterns.is_empty() {
        lines.push(format!("Patterns: {}", data.patterns.join("; ")));
    }
    if !data.why_statement.is_empty() {
        lines.push(format!("Why: {}", data.why_statement));
    }
    lines.push(format!("Messages: {}", snapshot.messages.len()));
    lines.join("\n")
}

/// Text an event contributes to the transcript on stdout.
///
/// Decided from the event alone: later fragments of the same message arrive
/// as their own events, so nothing is read back from the store.
pub fn render_text(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::MessageAdded {
            sender: Sender::Coach,
            streaming,
            content,
            ..
        } => Some(if *streaming {
            "\nCoach: ".to_string()
        } else {
            format!("\nCoach: {}\n\n", content)
        }),
        SessionEvent::FragmentAppended { fragment, .. } => Some(fragment.clone()),
        SessionEvent::MessageFinalized { .. } => Some("\n\n".to_string()),
        SessionEvent::PhaseChanged { to, .. } => Some(format!("[Phase: {}]\n\n", phase_indicator(*to))),
        _ => None,
    }
}

fn render(event: &SessionEvent) {
    if let SessionEvent::Error { message } = event {
        eprintln!("{}", message);
    } else if let Some(text) = render_text(event) {
        print!("{}", text);
        flush_stdout();
    }
}

fn spawn_renderer(mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => render(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Renderer fell behind session events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Runs one turn, turning Ctrl-C into a stop request instead of exiting.
async fn drive_turn<B: ChatBackend>(coach: &CoachSession<B>, text: &str) -> crate::error::Result<TurnOutcome> {
    let turn = coach.send_turn(text);
    tokio::pin!(turn);
    loop {
        tokio::select! {
            result = &mut turn => return result,
            _ = tokio::signal::ctrl_c() => {
                coach.stop_generation().await;
            }
        }
    }
}

/// Starts over. A failure is reported and dismissed; the chat loop keeps going.
async fn restart_session<B: ChatBackend>(coach: &CoachSession<B>) -> bool {
    match coach.start_session().await {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Restart failed");
            coach.clear_error().await;
            false
        }
    }
}

/// Loads models, starts a session and reads user turns from stdin until the
/// session completes, the user quits, or stdin closes.
pub async fn run_chat<B: ChatBackend + 'static>(coach: Arc<CoachSession<B>>) -> Result<()> {
    let renderer = spawn_renderer(coach.subscribe());

    coach.load_models().await?;
    if let Some(model) = coach.selected_model().await {
        println!("Using model {} ({})", model.name, model.server_name);
    }
    coach.start_session().await?;
    println!("{}\n", HELP_TEXT);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{}", HELP_TEXT);
                continue;
            }
            "/status" => {
                println!("{}\n", format_status(&coach.snapshot().await));
                continue;
            }
            "/restart" => {
                restart_session(&coach).await;
                continue;
            }
            _ => {}
        }

        match drive_turn(&coach, input).await {
            Ok(TurnOutcome::Stopped) => info!("Response stopped"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Turn failed");
                // The error was already rendered; dismiss it so the next turn starts clean.
                coach.clear_error().await;
            }
        }

        if coach.phase().await == Phase::Completed {
            println!("Your Why Discovery session is complete.");
            println!("{}", format_status(&coach.snapshot().await));
            break;
        }
    }

    renderer.abort();
    Ok(())
}
