//! First-run interactive setup wizard.
//!
//! Steps:
//! 1. Display banner
//! 2. Collect model endpoint and API key
//! 3. Collect model names for the grand, code, and dataset agents
//! 4. Collect CSV datasets
//! 5. Write router.toml

use crate::config::{self, DatasetConfig, RouterConfig};
use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::path::Path;

const BANNER: &str = r#"
  _____         _    ____             _
 |_   _|_ _ ___| | _|  _ \ ___  _   _| |_ ___ _ __
   | |/ _` / __| |/ / |_) / _ \| | | | __/ _ \ '__|
   | | (_| \__ \   <|  _ < (_) | |_| | ||  __/ |
   |_|\__,_|___/_|\_\_| \_\___/ \__,_|\__\___|_|

        Natural-language tasks, routed to agents
"#;

/// Run the interactive setup wizard and write the config to `config_path`.
pub fn run_setup_wizard(config_path: &Path) -> Result<RouterConfig> {
    println!("{}", BANNER);
    println!("Welcome to TaskRouter setup.\n");

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let existing = config::load_config(config_path)?;
    let config = collect_config(&mut reader, existing)?;

    println!("\n[4/4] Writing configuration...");
    config::save_config(&config, config_path)?;
    println!("  Written: {}", config_path.display());

    println!("\nSetup complete! Run `taskrouter run \"1+1\"` to try it.\n");
    Ok(config)
}

/// Ask for every setting, offering the current value as the default.
fn collect_config(reader: &mut impl BufRead, base: RouterConfig) -> Result<RouterConfig> {
    let mut config = base;

    // Step 1: Model endpoint
    println!("[1/4] Model API");
    config.model.api_url = prompt_with_default(reader, "  API URL", &config.model.api_url)?;
    let key = prompt(
        reader,
        &format!(
            "  API key (or press Enter to read ${} at run time)",
            config.model.api_key_env
        ),
    )?;
    if !key.is_empty() {
        config.model.api_key = key;
    }

    // Step 2: Models
    println!("\n[2/4] Models");
    config.grand.model = prompt_with_default(reader, "  Grand agent model", &config.grand.model)?;
    config.code_agent.model =
        prompt_with_default(reader, "  Code agent model", &config.code_agent.model)?;
    config.dataset_agent.model =
        prompt_with_default(reader, "  Dataset agent model", &config.dataset_agent.model)?;

    // Step 3: Datasets
    println!("\n[3/4] Datasets");
    if !config.datasets.is_empty() {
        println!("  Currently configured:");
        for ds in &config.datasets {
            println!("    {}", ds.path);
        }
        let keep = prompt_with_default(reader, "  Keep these? (y/n)", "y")?;
        if !keep.eq_ignore_ascii_case("y") {
            config.datasets.clear();
        }
    }
    println!("  Enter CSV file paths, one per line. Empty line to finish.");
    loop {
        let path = prompt(reader, "  CSV path")?;
        if path.is_empty() {
            break;
        }
        config.datasets.push(DatasetConfig {
            path,
            ..DatasetConfig::default()
        });
    }

    Ok(config)
}

/// Prompt the user for input with a label.
fn prompt(reader: &mut impl BufRead, label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    reader.read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Prompt with a default value.
fn prompt_with_default(reader: &mut impl BufRead, label: &str, default: &str) -> Result<String> {
    print!("{} [{}]: ", label, default);
    io::stdout().flush()?;
    let mut input = String::new();
    reader.read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}
