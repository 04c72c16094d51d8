//! Configuration file (burnish.toml).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use burnish_pipeline::{
    ImageOptions, MarkupOptions, Mode, PipelineConfig, StyleOptions, VerifyOptions,
};
use burnish_server::DevServerConfig;

/// Configuration file structure.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub markup: MarkupOptions,
    #[serde(default)]
    pub style: StyleOptions,
    #[serde(default)]
    pub images: ImageOptions,
    #[serde(default)]
    pub verify: VerifyOptions,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_partial_prefix")]
    pub partial_prefix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: default_source_dir(),
            partial_prefix: default_partial_prefix(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub open: bool,
    #[serde(default = "default_cors")]
    pub cors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open: false,
            cors: default_cors(),
        }
    }
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("source")
}
fn default_partial_prefix() -> String {
    "_".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_cors() -> bool {
    true
}

/// Load configuration if the file exists.
///
/// Returns an error if the file exists but is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        tracing::debug!("No {} found, using defaults", path.display());
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

impl ConfigFile {
    /// Pipeline configuration for the given environment mode.
    pub fn pipeline(&self, mode: Mode) -> PipelineConfig {
        PipelineConfig {
            source_dir: self.source.dir.clone(),
            output_dir: self.output.dir.clone(),
            partial_prefix: self.source.partial_prefix.clone(),
            mode,
            markup: self.markup.clone(),
            style: self.style.clone(),
            images: self.images.clone(),
            verify: self.verify.clone(),
        }
    }

    /// Dev server configuration, with command-line overrides.
    pub fn server(&self, port: Option<u16>, open: bool) -> DevServerConfig {
        DevServerConfig {
            root: self.output.dir.clone(),
            watch_dir: self.source.dir.clone(),
            port: port.unwrap_or(self.server.port),
            host: self.server.host.clone(),
            open: open || self.server.open,
            cors: self.server.cors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_uses_defaults() {
        let temp = tempdir().unwrap();

        let config = load_config(&temp.path().join("burnish.toml")).unwrap();

        assert_eq!(config.source.dir, PathBuf::from("source"));
        assert_eq!(config.output.dir, PathBuf::from("."));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.images.jpeg_quality, 75);
        assert!(!config.markup.validation.require_sri);
    }

    #[test]
    fn reads_sections() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("burnish.toml");
        fs::write(
            &path,
            r#"
[source]
dir = "src/site"

[markup.validation]
require_sri = true

[markup.validation.rules]
no-inline-style = "off"

[markup.beautify]
indent_size = 2

[style.targets]
safari = "13.1"

[images]
jpeg_quality = 60

[verify]
exclude = ["vendor/**"]

[server]
port = 8080
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let pipeline = config.pipeline(Mode::Development);
        let server = config.server(None, false);

        assert_eq!(pipeline.source_dir, PathBuf::from("src/site"));
        assert!(pipeline.markup.validation.require_sri);
        assert_eq!(pipeline.markup.beautify.indent_size, 2);
        assert_eq!(pipeline.style.targets.0.get("safari").map(String::as_str), Some("13.1"));
        assert_eq!(pipeline.images.jpeg_quality, 60);
        assert_eq!(pipeline.verify.exclude, vec!["vendor/**".to_string()]);
        assert!(pipeline.mode.is_dev());
        assert_eq!(server.port, 8080);
        assert_eq!(server.watch_dir, PathBuf::from("src/site"));
    }

    #[test]
    fn command_line_overrides_port() {
        let config = ConfigFile::default();

        assert_eq!(config.server(Some(4000), true).port, 4000);
        assert!(config.server(None, true).open);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("burnish.toml");
        fs::write(&path, "[server]\nport = \"eighty\"\n").unwrap();

        assert!(load_config(&path).is_err());
    }
}
