use crate::output::print_json;
use anyhow::Context;
use killswitch_core::config::Config;
use std::path::Path;

/// Write a starter `killswitch.yaml`: redb store and file audit log under
/// `data/` next to the config. An existing file is left alone unless `force`.
pub fn run(config_path: &Path, force: bool, json: bool) -> anyhow::Result<()> {
    let config = Config::durable();
    let created = if force {
        config.save(config_path)?;
        true
    } else {
        let yaml = serde_yaml::to_string(&config).context("failed to render config")?;
        killswitch_core::io::write_if_missing(config_path, yaml.as_bytes())?
    };

    if json {
        print_json(&serde_json::json!({
            "path": config_path.display().to_string(),
            "created": created,
        }))?;
    } else if created {
        println!("Wrote {}", config_path.display());
        println!("Start the server with: killswitch serve");
    } else {
        println!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    Ok(())
}
