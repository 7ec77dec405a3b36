use crate::error::{OqcError, Result};
use battery_oqc_common::ScoringConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub api_endpoint: String,
    pub max_image_size: u32,
    pub timeout_seconds: u64,
    pub max_concurrency: usize,
    pub tesseract_cmd: String,
    pub tesseract_psm: u8,
    pub grid_rows: u32,
    pub grid_cols: u32,
    pub numeric_tolerance: f64,
    pub max_serial_distance: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-3-5-sonnet-20241022".into(),
            api_endpoint: DEFAULT_API_ENDPOINT.into(),
            max_image_size: 1568,  // Claude Vision推奨サイズ
            timeout_seconds: 120,
            max_concurrency: 4,
            tesseract_cmd: "tesseract".into(),
            tesseract_psm: 6,
            grid_rows: 2,
            grid_cols: 4,
            numeric_tolerance: 0.01,
            max_serial_distance: 2,
        }
    }
}

impl Config {
    /// 設定ファイル → .env → 環境変数 の順に読み込む（後勝ち）
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file(&Self::config_path()?)?;

        dotenvy::dotenv().ok();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// 設定ファイルのみ（環境変数を反映しない）
    fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| OqcError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("battery-oqc").join("config.json"))
    }

    fn apply_env(&mut self) {
        if let Some(key) = non_empty_env("ANTHROPIC_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = non_empty_env("CLAUDE_MODEL") {
            self.model = model;
        }
        if let Some(cmd) = non_empty_env("TESSERACT_CMD") {
            self.tesseract_cmd = cmd;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(OqcError::Config("max_concurrency は1以上にしてください".into()));
        }
        if self.grid_rows == 0 || self.grid_cols == 0 {
            return Err(OqcError::Config("grid_rows / grid_cols は1以上にしてください".into()));
        }
        if !(self.numeric_tolerance >= 0.0) {
            return Err(OqcError::Config("numeric_tolerance は0以上にしてください".into()));
        }
        Ok(())
    }

    /// APIキー（空文字は未設定扱い）
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn set_api_key(&mut self, key: String) -> Result<()> {
        self.set_api_key_at(&Self::config_path()?, key)
    }

    /// ファイル上の設定にAPIキーだけを書き込む（.env・環境変数の値は保存しない）
    fn set_api_key_at(&mut self, path: &Path, key: String) -> Result<()> {
        let mut stored = Self::load_file(path)?;
        stored.api_key = Some(key.clone());
        stored.save_to(path)?;
        self.api_key = Some(key);
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn scoring(&self) -> ScoringConfig {
        ScoringConfig::new(self.numeric_tolerance, self.max_serial_distance)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
