//! Prints the path of every file dropped into `./FileDrop` once it can be
//! read. Stop with Ctrl-C.

use blockweld::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let drop_path = std::env::current_dir()?.join("FileDrop");
    tokio::fs::create_dir_all(&drop_path).await?;
    println!("=== File Drop Example ===");
    println!("drop files into {}", drop_path.display());

    let source = FileDropSource::watch(FileDropConfig::new(&drop_path))?;
    let logger = Arc::new(ActionBlock::new(|path: PathBuf| async move {
        println!("ready: {}", path.display());
        Ok(())
    }));
    source.link(logger.clone(), LinkOptions::propagating());

    tokio::signal::ctrl_c().await?;
    source.complete();
    logger.completion().await?;
    println!("File drop example completed!");
    Ok(())
}
