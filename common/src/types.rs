//! 認識結果の型定義
//!
//! CLIと各フロントエンドで共有される型:
//! - CellFields: 1セル分の5項目（パース直後の値）
//! - BatteryCellRecord: 認識済み/期待値のセルレコード
//! - RecognitionRunResult: 1回の認識処理の結果（永続化しない）
//! - RecognitionBatch: 保存時に作られるバッチ
//! - RecognitionStatus: バックエンドの準備状況

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// レコードを生成した認識方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecognitionMethod {
    #[serde(rename = "VisionAI", alias = "Claude AI", alias = "vision_ai")]
    VisionAi,
    #[serde(rename = "OCR", alias = "Traditional OCR", alias = "ocr")]
    Ocr,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for RecognitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionMethod::VisionAi => write!(f, "Vision AI"),
            RecognitionMethod::Ocr => write!(f, "OCR"),
            RecognitionMethod::Unknown => write!(f, "Unknown"),
        }
    }
}

/// セルの項目
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellField {
    SerialNumber,
    Model,
    Energy,
    Capacity,
    Voltage,
}

impl CellField {
    pub const ALL: [CellField; 5] = [
        CellField::SerialNumber,
        CellField::Model,
        CellField::Energy,
        CellField::Capacity,
        CellField::Voltage,
    ];

    /// 数値項目の単位
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            CellField::Energy => Some("Wh"),
            CellField::Capacity => Some("Ah"),
            CellField::Voltage => Some("V"),
            _ => None,
        }
    }
}

impl fmt::Display for CellField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellField::SerialNumber => "serial_number",
            CellField::Model => "model",
            CellField::Energy => "energy",
            CellField::Capacity => "capacity",
            CellField::Voltage => "voltage",
        };
        write!(f, "{}", name)
    }
}

/// パース済みの5項目
///
/// 数値は常に有限かつ正。FieldParser/レスポンスパーサー以外では生成しない想定。
#[derive(Debug, Clone, PartialEq)]
pub struct CellFields {
    pub serial_number: String,
    pub model: String,
    pub energy: f64,
    pub capacity: f64,
    pub voltage: f64,
}

impl CellFields {
    /// 出所情報を付与してレコード化
    pub fn into_record(
        self,
        source_image: &str,
        method: RecognitionMethod,
        processed_at: DateTime<Utc>,
    ) -> BatteryCellRecord {
        BatteryCellRecord {
            serial_number: self.serial_number,
            model: self.model,
            energy: self.energy,
            capacity: self.capacity,
            voltage: self.voltage,
            recognition_method: Some(method),
            source_image: source_image.to_string(),
            processed_at: Some(processed_at),
        }
    }
}

/// 電池セル1個分のレコード
///
/// 期待値（正解データ）では `recognition_method` と `processed_at` は省略される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryCellRecord {
    pub serial_number: String,
    pub model: String,
    pub energy: f64,          // Wh
    pub capacity: f64,        // Ah
    pub voltage: f64,         // V

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition_method: Option<RecognitionMethod>,

    #[serde(default, alias = "image_file")]
    pub source_image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl BatteryCellRecord {
    /// 期待値レコードを作成
    pub fn expected(serial_number: &str, model: &str, energy: f64, capacity: f64, voltage: f64) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            model: model.to_string(),
            energy,
            capacity,
            voltage,
            recognition_method: None,
            source_image: String::new(),
            processed_at: None,
        }
    }
}

/// 1レコード分の抽出失敗（実行全体は失敗させない）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub source_image: String,
    /// OCRの分割領域番号（Vision AIではセル番号）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<usize>,
    pub method: RecognitionMethod,
    pub reason: String,
}

/// フォールバックの記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEvent {
    pub source_image: String,
    pub reason: String,
}

/// 1回の認識処理の結果
///
/// 永続化はしない。保存する場合は `batch::aggregate` でバッチ化する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionRunResult {
    /// 順序は保証しない
    pub records: Vec<BatteryCellRecord>,
    pub preferred_method: RecognitionMethod,
    #[serde(default)]
    pub fallbacks: Vec<FallbackEvent>,
    #[serde(default)]
    pub failures: Vec<ExtractionFailure>,
    pub processed_at: DateTime<Utc>,
}

impl RecognitionRunResult {
    pub fn empty(preferred_method: RecognitionMethod, processed_at: DateTime<Utc>) -> Self {
        Self {
            records: Vec::new(),
            preferred_method,
            fallbacks: Vec::new(),
            failures: Vec::new(),
            processed_at,
        }
    }

    pub fn total_cells(&self) -> usize {
        self.records.len()
    }

    /// 警告件数（抽出失敗の数）
    pub fn warning_count(&self) -> usize {
        self.failures.len()
    }

    /// 実際に使われた認識方式
    pub fn methods_used(&self) -> BTreeSet<RecognitionMethod> {
        self.records
            .iter()
            .map(|r| r.recognition_method.unwrap_or(RecognitionMethod::Unknown))
            .collect()
    }

    pub fn fell_back(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

/// 保存済みバッチ（作成後は変更しない）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionBatch {
    pub batch_name: String,
    pub total_cells: usize,
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub vision_cells: usize,
    #[serde(default)]
    pub ocr_cells: usize,
}

/// バックエンド1つ分の状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub service_name: String,
    pub available: bool,
    pub configured: bool,
    pub description: String,
    /// モデル名やコマンドなどの補足
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 認識サービス全体の状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionStatus {
    pub vision_ai: BackendStatus,
    pub ocr: BackendStatus,
    /// どちらも使えない場合はNone
    pub preferred_method: Option<RecognitionMethod>,
}
