//! Prints the daemon's OpenAPI document, or writes it to the given path.
//! A `.json` target is written as JSON; anything else gets YAML.

use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use sqlperf_daemon::server::docs::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let openapi = ApiDoc::openapi();

    let Some(target) = env::args().nth(1) else {
        println!(
            "{}",
            openapi.to_yaml().context("failed to serialise OpenAPI")?
        );
        return Ok(());
    };

    let path = Path::new(&target);
    let rendered = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => openapi
            .to_pretty_json()
            .context("failed to serialise OpenAPI as JSON")?,
        _ => openapi.to_yaml().context("failed to serialise OpenAPI")?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory for {}", path.display()))?;
    }
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}
