use anyhow::{Context, Result};
use sonance_etl::{AudioAnalyzer, Config, IndexingPipeline, Progress, ProgressCallback};
use sonance_search::SharedIndex;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Index a music directory, stopping cleanly on Ctrl-C.
pub async fn run_index(music_dir: &Path, config: &Config) -> Result<()> {
    println!("\n🎵 Sonance Indexer\n");
    println!("  Music directory: {}", music_dir.display());
    println!("  Database: {}", config.database_path.display());
    println!("  Index: {}", config.index_path.display());
    println!();

    let db = super::open_database(&config.database_path)?;
    if let Some(parent) = config.index_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let index = SharedIndex::new(&config.index_path);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Stopping; finishing the current batch...");
            on_ctrl_c.cancel();
        }
    });

    let progress: ProgressCallback = Arc::new(|p: Progress| {
        if p.processed == p.total || p.processed % 25 == 0 {
            eprintln!("  ⏳ {p}");
        }
    });

    let pipeline = IndexingPipeline::new(
        &db,
        &index,
        Arc::new(AudioAnalyzer::new(config.analyzer())),
        config.indexer(),
    )
    .with_progress(progress);

    match pipeline.index_library(music_dir, &cancel).await {
        Ok(report) => {
            println!("\n{report}");
            println!("\n✓ Indexing complete");
            Ok(())
        }
        Err(e) if e.is_interrupted() => {
            println!("\n⏸ Indexing interrupted. Progress is saved; run again to resume.");
            Ok(())
        }
        Err(e) => Err(e).context("Indexing failed"),
    }
}
