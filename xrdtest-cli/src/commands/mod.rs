//! Command handlers -- one module per subcommand

pub mod config;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use xrdtest_core::XrdtestConfig;
use xrdtest_core::error::XrdtestError;

use crate::cli::DEFAULT_CONFIG_PATH;
use crate::error::CliError;

/// Load the configuration file.
///
/// A missing file is only tolerated at the default path.
pub async fn load_config(path: &Path) -> Result<XrdtestConfig, XrdtestError> {
    if path == Path::new(DEFAULT_CONFIG_PATH) {
        XrdtestConfig::load_or_default(path).await
    } else {
        XrdtestConfig::load(path).await
    }
}

/// Resolve a scenario argument into the list of descriptor files to process.
///
/// A file is returned as-is. A directory is searched recursively for `*.json`
/// files, returned in sorted path order.
pub fn collect_scenarios(path: &Path) -> Result<Vec<PathBuf>, CliError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        CliError::InvalidArgument(format!("cannot access {}: {e}", path.display()))
    })?;

    if metadata.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut found = Vec::new();
    walk_json(path, &mut found)?;
    found.sort();

    if found.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "no *.json scenarios found under {}",
            path.display()
        )));
    }
    Ok(found)
}

fn walk_json(dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), CliError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_json(&path, found)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            found.push(path);
        }
    }
    Ok(())
}
