use anyhow::{Context, Result};
use sonance_etl::Config;
use sonance_search::{PlaylistError, PlaylistGenerator, SeedSpec, SharedIndex};
use std::path::PathBuf;

/// Options for `sonance generate`; unset values come from the config.
#[derive(Debug)]
pub struct GenerateArgs {
    pub seeds: Vec<String>,
    pub length: Option<usize>,
    pub jitter: Option<f32>,
    pub output: Option<PathBuf>,
    pub random_seed: Option<u64>,
}

pub fn run_generate(config: &Config, args: &GenerateArgs) -> Result<()> {
    let seeds = args
        .seeds
        .iter()
        .map(|s| {
            SeedSpec::parse(s)
                .with_context(|| format!("Invalid seed '{s}'; expected \"Title|Artist|Album\""))
        })
        .collect::<Result<Vec<_>>>()?;

    let db = super::open_database(&config.database_path)?;
    let index = SharedIndex::new(&config.index_path);
    if !index.exists_on_disk() {
        anyhow::bail!(
            "No index at {}. Run `sonance index <path>` first.",
            config.index_path.display()
        );
    }

    let settings = config.playlist();
    let length = args.length.unwrap_or(settings.default_length);
    let jitter = args.jitter.unwrap_or(settings.default_bpm_jitter);
    let mut generator = match args.random_seed {
        Some(seed) => PlaylistGenerator::with_seed(&db, &index, settings, seed),
        None => PlaylistGenerator::new(&db, &index, settings),
    };

    let playlist = match generator.generate(&seeds, length, jitter) {
        Ok(Some(playlist)) => playlist,
        Ok(None) => {
            println!("No similar songs found.");
            return Ok(());
        }
        Err(e) => match hint(&e) {
            Some(hint) => anyhow::bail!("{e}. {hint}"),
            None => return Err(e).context("Playlist generation failed"),
        },
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.playlist_output.clone());
    let format = sonance_search::export(&playlist, &output)?;

    println!("\n🎶 Playlist ({} songs)\n", playlist.len());
    for (i, song) in playlist.songs.iter().enumerate() {
        println!("  {:>2}. {song}", i + 1);
    }
    println!("\n✓ Saved {format} playlist to {}", output.display());

    Ok(())
}

/// What the user can do about a seed that didn't work out.
fn hint(error: &PlaylistError) -> Option<&'static str> {
    match error {
        PlaylistError::NoSeedsFound => Some("Seeds must match title, artist and album exactly."),
        PlaylistError::NoFeaturesForSeeds => {
            Some("Run `sonance index <path>` to finish extracting features.")
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_matches_error() {
        assert!(hint(&PlaylistError::NoSeedsFound)
            .unwrap()
            .contains("match title, artist and album"));
        assert!(hint(&PlaylistError::NoFeaturesForSeeds)
            .unwrap()
            .contains("sonance index"));
        assert!(hint(&PlaylistError::NoSeeds).is_none());
    }
}
