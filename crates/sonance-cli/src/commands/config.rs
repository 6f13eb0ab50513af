use anyhow::Result;
use sonance_etl::{config, Config};

/// Show the current effective configuration.
pub fn show_config(config: &Config) {
    println!("Current Configuration");
    println!("=====================\n");

    let path = config::config_file_path();
    println!("Config file: {}", path.display());
    println!(
        "File exists: {}\n",
        if path.exists() { "yes" } else { "no (using defaults)" }
    );

    println!("Settings:");
    println!("  database_path: {}", config.database_path.display());
    println!("  index_path: {}", config.index_path.display());
    println!("  playlist_output: {}", config.playlist_output.display());
    println!("  extensions: {}", config.extensions.join(", "));
    println!("  batch_size: {}", config.batch_size);
    println!("  workers: {}", config.workers);
    println!("  task_timeout_secs: {}", config.task_timeout_secs);
    println!("  sample_rate: {}", config.sample_rate);
    println!("  max_duration_secs: {}", config.max_duration_secs);
    println!("  rebuild_threshold: {}", config.rebuild_threshold);
    println!("  candidate_multiplier: {}", config.candidate_multiplier);
    println!("  candidate_buffer: {}", config.candidate_buffer);
    println!("  query_noise_scale: {}", config.query_noise_scale);
    println!("  default_length: {}", config.default_length);
    println!("  default_bpm_jitter: {}", config.default_bpm_jitter);
    println!("  logging.level: {:?}", config.logging.level());
    println!("  logging.coloured: {}", config.logging.coloured());
    println!("  logging.output: {:?}", config.logging.output());

    println!("\nPriority: CLI args > ENV vars (SONANCE_*) > Config file > Defaults");
}

/// Show the config file path.
pub fn show_path() {
    println!("{}", config::config_file_path().display());
}

/// Show example configuration.
pub fn show_example() {
    print!("{}", config::example_config());
}

/// Initialize config file with defaults.
pub fn init_config() -> Result<()> {
    let created = config::ensure_config_file()?;
    let config_path = config::config_file_path();

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to configure sonance.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(())
}
