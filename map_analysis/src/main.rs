use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use map_analysis::analysis::comparison::{run_level, write_score_tables, ScoreTables};
use map_analysis::config::MapConfig;
use map_analysis::data_handling::plate_profile::PlateProfile;
use map_analysis::helper_functions::{project_root, write_config_json};
use map_analysis::models::{Dataset, ProfileLevel};

fn main() -> anyhow::Result<()> {
    // Setup logging and project configuration
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting the mAP analysis");

    let root = project_root();
    let config = MapConfig::load_or_default(&root.join("map_config.json")).context("loading map_config.json")?;

    let results_dir = root.join(&config.results_dir);
    write_config_json(&config, &results_dir.join("run_config.json")).context("writing run_config.json")?;

    let profile_path = root.join(&config.profile_path);
    let profile_path = profile_path
        .to_str()
        .with_context(|| format!("non UTF-8 profile path {}", profile_path.display()))?;
    let profiles = PlateProfile::new(profile_path, &config.perturbation_col)
        .load()
        .with_context(|| format!("loading {}", profile_path))?;

    for level in &config.levels {
        let mut tables = run_level(&profiles, *level, &config).with_context(|| format!("mAP at {} level", level))?;
        report(&tables, *level);
        write_score_tables(&mut tables, *level, &results_dir)?;
    }

    info!("Results written to {}", results_dir.display());
    Ok(())
}

fn report(tables: &[ScoreTables], level: ProfileLevel) {
    for t in tables {
        let n = t.map_scores.height();
        if n == 0 {
            warn!("{} / {}: no group had a defined AP", level, t.space.label());
        } else {
            info!("{} / {}: {} groups scored", level, t.space.label(), n);
        }
    }
}
