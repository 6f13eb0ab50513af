use anyhow::Result;
use sonance_core::MetadataStore;
use sonance_etl::Config;
use sonance_search::SharedIndex;

pub fn show_status(config: &Config) -> Result<()> {
    let db = super::open_database(&config.database_path)?;
    let stats = db.stats()?;
    let index = SharedIndex::new(&config.index_path);

    println!("\n📊 Sonance Status\n");
    println!("  Database: {}", config.database_path.display());
    println!("  Tracks: {}", stats.total_tracks);
    println!("  With features: {}", stats.tracks_with_features);
    println!("  Pending features: {}", stats.tracks_without_features);

    if index.exists_on_disk() {
        match index.get() {
            Ok(loaded) => println!(
                "  Index: {} tracks, dimension {}",
                loaded.len(),
                loaded.dimension().unwrap_or(0)
            ),
            Err(e) => println!("  Index: unreadable ({e})"),
        }
    } else {
        println!("  Index: not built");
    }

    if stats.tracks_without_features > 0 {
        println!("\n  Run `sonance index <path>` to finish extracting features");
    }

    Ok(())
}
