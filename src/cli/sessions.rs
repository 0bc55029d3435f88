use anyhow::{Context, Result, bail};
use colored::Colorize;

use teller::config::Config;
use teller::session::{JsonFileSessionStore, SessionStore};

use super::args::SessionsCommand;
use super::util::truncate;

const TRACE_PREVIEW_CHARS: usize = 160;

pub(crate) async fn handle_sessions(command: SessionsCommand, config: &Config) -> Result<()> {
    let store = JsonFileSessionStore::new(&config.session.dir, config.session.max_history);

    match command {
        SessionsCommand::List => list(&store).await,
        SessionsCommand::Show { session, history } => show(&store, &session, history).await,
        SessionsCommand::Delete { session } => {
            if !store.delete(&session).await.context("Failed to delete session")? {
                bail!("Session '{session}' not found");
            }
            println!("🗑️  Deleted session {}", session.cyan());
            Ok(())
        }
        SessionsCommand::Clear { session } => {
            if !store.clear_state(&session).await.context("Failed to clear session state")? {
                bail!("Session '{session}' not found");
            }
            println!("🧹 Cleared conversation state of {}", session.cyan());
            Ok(())
        }
    }
}

async fn list(store: &JsonFileSessionStore) -> Result<()> {
    let ids = store.list().await.context("Failed to list sessions")?;
    if ids.is_empty() {
        println!("No sessions stored in {}", store.dir().display());
        return Ok(());
    }

    for id in ids {
        match store.info(&id).await {
            Ok(Some(info)) => println!(
                "{}  {} turns  updated {}",
                id.cyan(),
                info.turn_count,
                info.last_updated.format("%Y-%m-%d %H:%M:%S")
            ),
            Ok(None) => {}
            Err(err) => println!("{}  {}", id.cyan(), format!("unreadable: {err}").red()),
        }
    }
    Ok(())
}

async fn show(store: &JsonFileSessionStore, session_id: &str, with_history: bool) -> Result<()> {
    let Some(record) = store.load(session_id).await.context("Failed to load session")? else {
        bail!("Session '{session_id}' not found");
    };
    let info = record.info();

    println!("{} {}", "Session:".bold(), info.session_id.cyan());
    println!("   Created: {}", info.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("   Updated: {}", info.last_updated.format("%Y-%m-%d %H:%M:%S"));
    println!("   Turns: {} ({} stored)", info.turn_count, info.conversation_count);
    if !info.customer_info.is_empty() {
        println!("   Customer: {}", serde_json::Value::Object(info.customer_info.clone()));
    }
    if let Some(marker) = &info.error_recovery {
        println!(
            "   {} {} ({})",
            "Last error:".red(),
            marker.error_message,
            marker.recorded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{}", "State:".bold());
    for line in info.current_state.describe().lines() {
        println!("   {line}");
    }

    if with_history {
        println!("\n{}", "History:".bold());
        for (index, turn) in record.history.iter().enumerate() {
            println!("   {}. {} {}", index + 1, "Q:".green(), turn.user_query);
            println!("      {} {}", "A:".blue(), turn.final_response_text);
            if !turn.trace_record.is_empty() {
                println!(
                    "      {}",
                    truncate(turn.trace_record.trim(), TRACE_PREVIEW_CHARS).dimmed()
                );
            }
        }
    }
    Ok(())
}
