use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    /// First generated project id is `project_id_seed + 1`.
    #[serde(default)]
    pub project_id_seed: i64,
    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            project_id_seed: 0,
            max_pdf_pages: default_max_pdf_pages(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_max_pdf_pages() -> usize {
    20
}
fn default_max_in_flight() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            follow_symlinks: false,
        }
    }
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "bmp", "tif", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_edge")]
    pub max_width: u32,
    #[serde(default = "default_thumbnail_edge")]
    pub max_height: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_thumbnail_edge(),
            max_height: default_thumbnail_edge(),
        }
    }
}

fn default_thumbnail_edge() -> u32 {
    256
}

impl Config {
    /// Configuration used when no file is available: database under `./data`,
    /// every other section at its defaults.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/labelsync.sqlite"),
            },
            loader: LoaderConfig::default(),
            files: FilesConfig::default(),
            thumbnail: ThumbnailConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.loader.project_id_seed < 0 {
        anyhow::bail!("loader.project_id_seed must be >= 0");
    }
    if config.loader.max_pdf_pages == 0 {
        anyhow::bail!("loader.max_pdf_pages must be > 0");
    }
    if config.loader.max_in_flight == 0 {
        anyhow::bail!("loader.max_in_flight must be > 0");
    }

    if config.files.image_extensions.is_empty() {
        anyhow::bail!("files.image_extensions must list at least one extension");
    }
    if let Some(bad) = config
        .files
        .image_extensions
        .iter()
        .find(|ext| ext.is_empty() || ext.contains(['.', '/', '*']))
    {
        anyhow::bail!(
            "files.image_extensions entry '{}' must be a bare extension such as 'png'",
            bad
        );
    }

    if config.thumbnail.max_width == 0 || config.thumbnail.max_height == 0 {
        anyhow::bail!("thumbnail.max_width and thumbnail.max_height must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_db_section_is_required() {
        let config: Config = toml::from_str(
            r#"
[db]
path = "/tmp/labelsync.sqlite"
"#,
        )
        .unwrap();
        validate(&config).unwrap();

        assert_eq!(config.loader.project_id_seed, 0);
        assert_eq!(config.loader.max_pdf_pages, 20);
        assert_eq!(config.loader.max_in_flight, 16);
        assert!(config.files.image_extensions.contains(&"png".to_string()));
        assert!(!config.files.follow_symlinks);
        assert_eq!(config.thumbnail.max_width, 256);
    }

    #[test]
    fn rejects_zero_page_cap() {
        let config: Config = toml::from_str(
            r#"
[db]
path = "/tmp/labelsync.sqlite"

[loader]
max_pdf_pages = 0
"#,
        )
        .unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_pdf_pages"));
    }

    #[test]
    fn rejects_glob_shaped_extension() {
        let config: Config = toml::from_str(
            r#"
[db]
path = "/tmp/labelsync.sqlite"

[files]
image_extensions = ["*.png"]
"#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("lsync.toml");
        std::fs::write(
            &path,
            r#"
[db]
path = "./data/x.sqlite"

[loader]
project_id_seed = 41
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.loader.project_id_seed, 41);
        assert!(load_config(&tmp.path().join("missing.toml")).is_err());
    }
}
