use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Result, bail};
use colored::Colorize;
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use teller::pipeline::{PipelineOrchestrator, TurnRequest};
use teller::response::{ResponseEvent, TURN_CANCELLED_MESSAGE};

use super::args::{AskArgs, ReplArgs};
use super::util::{customer_info, session_id_or_new};

const EXIT_WORDS: &[&str] = &["exit", "quit", "종료"];

pub(crate) async fn handle_ask(args: AskArgs, orchestrator: Arc<PipelineOrchestrator>) -> Result<()> {
    let query = args.query.join(" ").trim().to_owned();
    if query.is_empty() {
        bail!("Question cannot be empty. Usage: teller ask \"잔액 확인해줘\"");
    }

    let session_id = session_id_or_new(args.session);
    let mut request = TurnRequest::new(&session_id, query);
    if let Some(customer) = customer_info(args.customer_name) {
        request = request.with_customer(customer);
    }

    let answered = stream_turn(&orchestrator, request).await?;
    eprintln!("{} {}", "session:".dimmed(), session_id.dimmed());
    if !answered {
        bail!("No answer was produced for session {session_id}");
    }
    Ok(())
}

pub(crate) async fn handle_repl(args: ReplArgs, orchestrator: Arc<PipelineOrchestrator>) -> Result<()> {
    let session_id = session_id_or_new(args.session);
    let mut customer = customer_info(args.customer_name);

    println!("{}", "🏦 teller - conversational banking assistant".bold());
    println!("   Session: {}", session_id.cyan());
    println!("   Type 'exit' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".green().bold());
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&query) {
            break;
        }

        let mut request = TurnRequest::new(&session_id, query);
        // Customer info is stored with the session on the first turn.
        if let Some(info) = customer.take() {
            request = request.with_customer(info);
        }
        print!("{} ", "teller>".blue().bold());
        io::stdout().flush()?;
        stream_turn(&orchestrator, request).await?;
    }

    Ok(())
}

/// Prints the answer as it streams. Ctrl-C cancels the turn in flight.
/// Returns `false` when the turn failed.
async fn stream_turn(orchestrator: &Arc<PipelineOrchestrator>, request: TurnRequest) -> Result<bool> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut stream = orchestrator.respond(request, cancel);
    let mut answered = false;
    while let Some(event) = stream.next().await {
        match event {
            ResponseEvent::Chunk(text) => {
                print!("{text}");
                io::stdout().flush()?;
            }
            ResponseEvent::Complete => {
                println!();
                answered = true;
            }
            ResponseEvent::Error(message) if message == TURN_CANCELLED_MESSAGE => {
                println!();
                eprintln!("{} {}", "⚠️ ".yellow(), message.yellow());
            }
            ResponseEvent::Error(message) => {
                println!();
                eprintln!("{} {}", "❌".red(), message.red());
            }
        }
    }
    watcher.abort();
    Ok(answered)
}
