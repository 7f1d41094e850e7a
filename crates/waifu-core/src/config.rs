//! Configuration loading and persistence.
//!
//! Values resolve as env > `config.toml` > built-in default.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::DeviceSelector;
use crate::presentation::{BannerOptions, Faces};

pub const ENV_BASE_URL: &str = "WAIFU_BASE_URL";
pub const ENV_API_KEY: &str = "WAIFU_API_KEY";
pub const ENV_USER_ID: &str = "WAIFU_USER_ID";
pub const ENV_OUTPUT_DEVICE: &str = "WAIFU_OUTPUT_DEVICE";
pub const ENV_VOICE: &str = "WAIFU_VOICE";

fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Overlays user values onto the template so new keys and comments appear
/// while customized values survive.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;
    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    merge_items(doc.as_table_mut(), user_doc.as_table());
    Ok(doc.to_string())
}

fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source.iter() {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! WAIFU_HOME resolution order:
    //! 1. WAIFU_HOME environment variable (if set)
    //! 2. ~/.config/waifu (default)

    use std::path::PathBuf;

    pub fn waifu_home() -> PathBuf {
        if let Ok(home) = std::env::var("WAIFU_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".waifu"),
            |h| h.join(".config").join("waifu"),
        )
    }

    pub fn config_path() -> PathBuf {
        waifu_home().join("config.toml")
    }

    pub fn logs_dir() -> PathBuf {
        waifu_home().join("logs")
    }
}

/// Output device as written in the config: an index or a name fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputDeviceSetting {
    Index(i64),
    Name(String),
}

impl OutputDeviceSetting {
    pub fn selector(&self) -> DeviceSelector {
        match self {
            OutputDeviceSetting::Index(i) => usize::try_from(*i)
                .map(DeviceSelector::Index)
                .unwrap_or_default(),
            OutputDeviceSetting::Name(name) => name.parse().unwrap_or_default(),
        }
    }
}

/// Persona icon sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BannerConfig {
    /// Fraction of the terminal width
    pub width_ratio: f32,
    pub min_width: u32,
    pub max_width: u32,
    /// 1.0 keeps the image aspect ratio; lower flattens it
    pub aspect_ratio: f32,
}

impl Default for BannerConfig {
    fn default() -> Self {
        Self {
            width_ratio: 0.5,
            min_width: 20,
            max_width: 40,
            aspect_ratio: 1.0,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the avatar server API
    pub base_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Server-assigned user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_start_message_prompt: Option<String>,

    pub character_voice_enabled: bool,

    /// Delay between printed characters (0 disables pacing)
    pub character_interval_ms: u64,

    /// Unset means detect from `COLORTERM`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_truecolor: Option<bool>,

    pub assistant_label_color: String,
    pub user_label_color: String,
    pub face_color: String,

    pub timeout_secs: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<OutputDeviceSetting>,

    /// Frames per audio write
    pub output_chunk_size: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Expression name to glyph; empty means the built-in faces
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub faces: BTreeMap<String, String>,

    pub banner: BannerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            user_id: None,
            on_start_message_prompt: None,
            character_voice_enabled: true,
            character_interval_ms: 20,
            use_truecolor: None,
            assistant_label_color: "38;2;255;64;160".to_string(),
            user_label_color: "38;2;80;200;120".to_string(),
            face_color: "38;2;255;224;243".to_string(),
            timeout_secs: 60,
            output_device: None,
            output_chunk_size: 1024,
            log_level: None,
            faces: BTreeMap::new(),
            banner: BannerConfig::default(),
        }
    }
}

fn env_nonempty(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn nonempty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolves the base URL with precedence: env > config > default.
///
/// # Errors
/// Returns an error if the chosen URL does not parse.
pub fn resolve_base_url(env_value: Option<&str>, config_value: &str) -> Result<String> {
    let url = nonempty(env_value)
        .or_else(|| nonempty(Some(config_value)))
        .unwrap_or_else(|| Config::DEFAULT_BASE_URL.to_string());
    url::Url::parse(&url).with_context(|| format!("Invalid server base URL: {url}"))?;
    Ok(url.trim_end_matches('/').to_string())
}

/// Parses an on/off switch such as `WAIFU_VOICE`.
pub fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    pub const DEFAULT_BASE_URL: &str = "http://localhost:8012/aiavatar/api";
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Saves the server-assigned user id to the default config file.
    ///
    /// # Errors
    /// Returns an error if the config cannot be written.
    pub fn save_user_id(user_id: &str) -> Result<()> {
        Self::save_user_id_to(&paths::config_path(), user_id)
    }

    /// Saves only the `user_id` field, preserving everything else.
    ///
    /// Creates the file from the template if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the existing file cannot be parsed or written.
    pub fn save_user_id_to(path: &Path, user_id: &str) -> Result<()> {
        use toml_edit::{DocumentMut, value};

        let contents = if path.exists() {
            let user_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            merge_with_template(&user_config)?
        } else {
            default_config_template().to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        doc["user_id"] = value(user_id);

        Self::write_config(path, &doc.to_string())
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Renders the template with values from `Config::default()`.
    ///
    /// # Errors
    /// Returns an error if serialization or template parsing fails.
    pub fn generate() -> Result<String> {
        use toml_edit::DocumentMut;

        let generated_toml = toml::to_string(&Config::default())
            .context("Failed to serialize default config to TOML")?;

        let mut doc: DocumentMut = default_config_template()
            .parse()
            .context("Failed to parse default config template")?;
        let generated_doc: DocumentMut = generated_toml
            .parse()
            .context("Failed to parse generated config")?;

        merge_items(doc.as_table_mut(), generated_doc.as_table());
        Ok(doc.to_string())
    }

    /// Writes via temp file + rename, creating parent directories.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    /// # Errors
    /// Returns an error if the resolved URL is invalid.
    pub fn effective_base_url(&self) -> Result<String> {
        resolve_base_url(env_nonempty(ENV_BASE_URL).as_deref(), &self.base_url)
    }

    pub fn effective_api_key(&self) -> Option<String> {
        env_nonempty(ENV_API_KEY).or_else(|| nonempty(self.api_key.as_deref()))
    }

    pub fn effective_user_id(&self) -> Option<String> {
        env_nonempty(ENV_USER_ID).or_else(|| nonempty(self.user_id.as_deref()))
    }

    pub fn effective_output_device(&self) -> DeviceSelector {
        if let Some(raw) = env_nonempty(ENV_OUTPUT_DEVICE) {
            return raw.parse().unwrap_or_default();
        }
        self.output_device
            .as_ref()
            .map(OutputDeviceSetting::selector)
            .unwrap_or_default()
    }

    pub fn effective_voice_enabled(&self) -> bool {
        env_nonempty(ENV_VOICE)
            .and_then(|v| parse_switch(&v))
            .unwrap_or(self.character_voice_enabled)
    }

    /// Explicit setting wins, otherwise `COLORTERM` decides.
    pub fn truecolor(&self) -> bool {
        self.use_truecolor.unwrap_or_else(|| {
            std::env::var("COLORTERM")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "truecolor" | "24bit"))
                .unwrap_or(false)
        })
    }

    pub fn character_interval(&self) -> Duration {
        Duration::from_millis(self.character_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Self::CONNECT_TIMEOUT
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn faces(&self) -> Faces {
        if self.faces.is_empty() {
            Faces::default()
        } else {
            Faces::from_map(&self.faces)
        }
    }

    pub fn banner_options(&self) -> BannerOptions {
        BannerOptions {
            width_ratio: self.banner.width_ratio,
            min_width: self.banner.min_width,
            max_width: self.banner.max_width,
            aspect_ratio: self.banner.aspect_ratio,
        }
    }
}
