//! Sends a batch of e-mails concurrently and reports a status per address.
//!
//! Messages are "sent" by writing them into an `Outbox` directory, the way a
//! pickup-directory mail client would.

use blockweld::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

async fn send_mail(outbox: Arc<PathBuf>, to: String) -> Result<()> {
    if !to.contains('@') {
        return Err(Error::custom(format!("invalid recipient {:?}", to)));
    }
    let message = format!(
        "From: from@domain.com\r\nTo: {}\r\nSubject: Test Email\r\n\r\nTest email body.\r\n",
        to
    );
    let file = outbox.join(format!("{}.eml", to.replace('@', "_at_")));
    tokio::fs::write(file, message).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let outbox = Arc::new(std::env::current_dir()?.join("Outbox"));
    tokio::fs::create_dir_all(outbox.as_ref()).await?;

    let recipients: Vec<String> = std::env::args().skip(1).collect();
    let recipients = if recipients.is_empty() {
        vec![
            "erez@taskmatics.com".to_string(),
            "dave@taskmatics.com".to_string(),
            "nobody".to_string(),
        ]
    } else {
        recipients
    };

    println!("=== E-mail Worker Example ===");
    let outcomes = collect_outcomes(recipients, ExecutionOptions::default(), move |to| {
        send_mail(outbox.clone(), to)
    })
    .await?;

    let mut outcomes: Vec<_> = outcomes.into_iter().collect();
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    for (address, outcome) in outcomes {
        println!("{}: {}", address, outcome);
    }
    Ok(())
}
