//! Station configuration (`config.toml`) and the camera folder table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, StationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProductMode {
    /// Product code fixed in the configuration file.
    #[default]
    Static,
    /// Product code read from the serial input channel.
    Live,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProductSection {
    pub mode: ProductMode,
    pub code: String,
    pub default_code: String,
    /// Rule file path; `{code}` is replaced by the product code.
    pub rules_path: String,
}

impl Default for ProductSection {
    fn default() -> Self {
        Self {
            mode: ProductMode::Static,
            code: "ABC123x".to_string(),
            default_code: "ABC123x".to_string(),
            rules_path: "config/products/{code}.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Save one annotated JPEG per rule outcome into `output_dir`.
    pub save_annotated: bool,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output/results"),
            log_dir: PathBuf::from("output/logs"),
            save_annotated: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub config_csv: PathBuf,
    pub create_folders: bool,
    /// Remove the isolated copy of an image once its batch is done.
    pub cleanup_temp: bool,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            config_csv: PathBuf::from("config/camera_config.csv"),
            create_folders: true,
            cleanup_temp: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialOutputSection {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    /// Turn the channel off when the very first connection fails.
    pub disable_on_connect_failure: bool,
}

impl Default for SerialOutputSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "COM5".to_string(),
            baud_rate: 9600,
            timeout_ms: 1000,
            retry_count: 3,
            retry_delay_ms: 500,
            disable_on_connect_failure: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialInputSection {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub stop_timeout_ms: u64,
    pub history: usize,
}

impl Default for SerialInputSection {
    fn default() -> Self {
        Self {
            port: "COM4".to_string(),
            baud_rate: 9600,
            timeout_ms: 1000,
            poll_interval_ms: 500,
            reconnect_backoff_ms: 5000,
            stop_timeout_ms: 2000,
            history: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    pub enabled: bool,
    pub wait_ms: u64,
    pub max_history: usize,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_ms: 30,
            max_history: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsSection {
    pub dir: PathBuf,
}

impl Default for ModelsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub product: ProductSection,
    pub paths: PathsSection,
    pub camera: CameraSection,
    pub serial_output: SerialOutputSection,
    pub serial_input: SerialInputSection,
    pub display: DisplaySection,
    pub models: ModelsSection,
}

impl StationConfig {
    /// Load the station file. A missing file falls back to defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let loaded = Self::read(path)?;
        Self::log_source(path, loaded.is_some());
        Ok(loaded.unwrap_or_default())
    }

    /// Parse the station file without logging. `None` when it does not exist,
    /// so callers that set up logging from the result can report it afterwards
    /// with [`StationConfig::log_source`].
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|e| StationError::config(path, e))?;
        let config = Self::from_toml(&text).map_err(|e| StationError::config(path, e))?;
        Ok(Some(config))
    }

    pub fn log_source(path: &Path, from_file: bool) {
        if from_file {
            info!("loaded configuration from {}", path.display());
        } else {
            warn!(
                "config file not found: {}, using default configuration",
                path.display()
            );
        }
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.serial_output.retry_delay_ms)
    }

    pub fn display_wait(&self) -> Duration {
        Duration::from_millis(self.display.wait_ms)
    }
}

/// Folder configuration of one camera.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CameraConfig {
    pub camera_name: String,
    pub input_folder: PathBuf,
    pub temp_folder: PathBuf,
    #[serde(default = "default_enabled", deserialize_with = "deserialize_flag")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    Ok(raw.is_empty() || raw.eq_ignore_ascii_case("true") || raw == "1")
}

/// All configured cameras, by name.
#[derive(Debug, Clone, Default)]
pub struct CameraTable {
    cameras: HashMap<String, CameraConfig>,
}

impl CameraTable {
    pub fn new(cameras: impl IntoIterator<Item = CameraConfig>) -> Self {
        Self {
            cameras: cameras
                .into_iter()
                .map(|c| (c.camera_name.clone(), c))
                .collect(),
        }
    }

    /// Load the camera CSV, creating folders for enabled cameras when asked to.
    pub fn load(path: &Path, create_folders: bool) -> Result<Self> {
        if !path.exists() {
            return Err(StationError::config(path, "camera table not found"));
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| StationError::config(path, e))?;

        let mut cameras = HashMap::new();
        for (index, row) in reader.deserialize::<CameraConfig>().enumerate() {
            let camera = match row {
                Ok(camera) => camera,
                Err(e) => {
                    warn!("{}: skipping row {}: {}", path.display(), index + 2, e);
                    continue;
                }
            };
            if camera.camera_name.is_empty() {
                continue;
            }

            if create_folders && camera.enabled {
                std::fs::create_dir_all(&camera.input_folder)?;
                std::fs::create_dir_all(&camera.temp_folder)?;
            }

            info!(
                "camera {} [{}] input={} temp={}",
                camera.camera_name,
                if camera.enabled { "enabled" } else { "disabled" },
                camera.input_folder.display(),
                camera.temp_folder.display()
            );
            cameras.insert(camera.camera_name.clone(), camera);
        }

        info!("{} cameras configured", cameras.len());
        Ok(Self { cameras })
    }

    /// Folder configuration of an enabled camera.
    pub fn get(&self, camera: &str) -> Result<&CameraConfig> {
        self.cameras
            .get(camera)
            .filter(|c| c.enabled)
            .ok_or_else(|| StationError::CameraNotConfigured(camera.to_string()))
    }

    pub fn enabled_cameras(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .cameras
            .values()
            .filter(|c| c.enabled)
            .map(|c| c.camera_name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}
