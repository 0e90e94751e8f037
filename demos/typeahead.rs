//! Simulates a user typing into a search box and only "searches" for the
//! text once typing pauses.

use blockweld::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Type-ahead Throttle Example ===");

    let throttle = ThrottleBlock::with_options(
        ThrottleOptions::new(Duration::from_millis(200)).flush_on_complete(true),
    );
    let search = Arc::new(ActionBlock::new(|query: String| async move {
        println!("search: {:?}", query);
        Ok(())
    }));
    throttle.link(search.clone(), LinkOptions::propagating());

    let mut typed = String::new();
    for ch in "SF Code Camp 2014".chars() {
        typed.push(ch);
        throttle.post(typed.clone());

        // Uneven pauses, some long enough to trigger a search
        let pause = (ch as u64 * 37) % 300;
        println!("typed {:?}, paused {}ms", typed, pause);
        sleep(Duration::from_millis(pause)).await;
    }

    throttle.complete();
    search.completion().await?;
    println!("Type-ahead example completed!");
    Ok(())
}
