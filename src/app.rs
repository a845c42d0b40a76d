use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::cli::{Cli, Command};
use crate::config::Options;
use crate::pool::SessionPool;
use crate::storage::Catalogue;
use crate::sync::SyncEngine;

pub async fn run(cli: Cli) -> Result<()> {
    let options = Arc::new(Options::from_env()?);
    let catalogue = Arc::new(Catalogue::open(&options.db_path).await?);
    let (pool, mut events) = SessionPool::new(Arc::clone(&options));

    // Drain progress events into the log. An HTTP facade would forward
    // them to its websocket subscribers instead.
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(
                mailbox = %event.mailbox,
                event = ?event.event_type,
                downloaded = event.total_downloaded,
                to_download = event.total_to_download,
                error = %event.error,
                warning = %event.warning,
                "mailbox event"
            );
        }
    });

    let engine = SyncEngine::new(
        Arc::clone(&catalogue),
        Arc::clone(&pool),
        Arc::clone(&options),
    );

    let outcome = match cli.command {
        Command::List => list_mailboxes(&engine).await,
        Command::Sync { mailboxes } => sync(&engine, mailboxes).await,
        Command::Search { term } => search(&catalogue, &term).await,
    };

    pool.close().await;
    let _ = event_task.await;
    outcome.map_err(Into::into)
}

async fn list_mailboxes(engine: &SyncEngine) -> crate::errors::Result<()> {
    let mut mailboxes = engine.enumerate_mailboxes().await?;
    mailboxes.sort_by(|a, b| a.name.cmp(&b.name));
    for mailbox in mailboxes {
        println!("{}", mailbox.name);
    }
    Ok(())
}

async fn sync(engine: &SyncEngine, requested: Vec<String>) -> crate::errors::Result<()> {
    let mut mailboxes = engine.enumerate_mailboxes().await?;
    if !requested.is_empty() {
        let requested: HashSet<&str> = requested.iter().map(String::as_str).collect();
        mailboxes.retain(|mailbox| requested.contains(mailbox.name.as_str()));
    }
    engine.sync_mailboxes(mailboxes).await
}

async fn search(catalogue: &Catalogue, term: &str) -> crate::errors::Result<()> {
    for email in catalogue.full_text_search(term).await? {
        let subject = email
            .envelope
            .as_ref()
            .and_then(|envelope| envelope.subject.clone())
            .unwrap_or_default();
        println!("{}  {}", email.our_id, subject);
        if !email.text_body.is_empty() {
            println!("    {}", email.text_body);
        }
    }
    Ok(())
}
