use super::context::AppContext;
use anyhow::{bail, Context, Result};
use parley_application::history::SearchOptions;
use parley_core::conversation::Conversation;
use std::path::Path;

fn print_row(conversation: &Conversation) {
    println!(
        "{:<38} {:<25} {:<10} {:>4}  {}",
        conversation.id,
        conversation.timestamp,
        conversation.provider,
        conversation.messages.len(),
        conversation.title
    );
}

pub async fn list(ctx: &AppContext, limit: usize) -> Result<()> {
    let history = ctx.history.try_get_history().await?;
    if history.is_empty() {
        println!("No conversations.");
        return Ok(());
    }
    for conversation in history.iter().take(limit) {
        print_row(conversation);
    }
    if history.len() > limit {
        println!("... {} more", history.len() - limit);
    }
    Ok(())
}

pub async fn show(ctx: &AppContext, id: &str) -> Result<()> {
    let Some(conversation) = ctx.history.load_conversation(id).await else {
        bail!("Conversation '{}' not found", id);
    };
    println!("{}", serde_json::to_string_pretty(&conversation)?);
    Ok(())
}

pub async fn search(
    ctx: &AppContext,
    term: &str,
    titles_only: bool,
    messages_only: bool,
    limit: usize,
) -> Result<()> {
    let options = SearchOptions {
        search_titles: !messages_only,
        search_messages: !titles_only,
        limit,
    };
    let found = ctx.history.search_conversations(term, options).await;
    if found.is_empty() {
        println!("No matches for '{}'.", term);
    }
    for conversation in &found {
        print_row(conversation);
    }
    Ok(())
}

pub async fn stats(ctx: &AppContext) -> Result<()> {
    let stats = ctx.history.get_statistics().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub async fn delete(ctx: &AppContext, id: &str) -> Result<()> {
    if ctx.history.delete_conversation(id).await? {
        println!("Deleted {}", id);
        Ok(())
    } else {
        bail!("Conversation '{}' not found", id)
    }
}

pub async fn rename(ctx: &AppContext, id: &str, title: &str) -> Result<()> {
    if ctx.history.update_conversation_title(id, title).await? {
        println!("Renamed {}", id);
        Ok(())
    } else {
        bail!("Conversation '{}' not found", id)
    }
}

pub async fn export(ctx: &AppContext) -> Result<()> {
    println!("{}", ctx.history.export_history().await?);
    Ok(())
}

pub async fn import(ctx: &AppContext, file: &Path) -> Result<()> {
    let json = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let imported = ctx.history.import_history(&json).await?;
    println!("Imported {} conversation(s)", imported);
    Ok(())
}
