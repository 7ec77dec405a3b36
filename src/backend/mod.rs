//! 認識バックエンド
//!
//! Vision AI と OCR を同じトレイトで扱い、オーケストレーターから差し替え可能にする。
//!
//! - [`vision`] - Claude Vision API
//! - [`ocr`] - 領域分割 + Tesseract

pub mod ocr;
pub mod vision;

use crate::error::BackendFailure;
use crate::scanner::Photograph;
use async_trait::async_trait;
use battery_oqc_common::{BackendStatus, BatteryCellRecord, ExtractionFailure, RecognitionMethod};

pub use ocr::{GridSegmenter, OcrBackend, Segmenter, TesseractEngine, TextRecognizer};
pub use vision::ClaudeVisionBackend;

/// バックエンド1回分の成功結果
///
/// 個別セルの解析失敗は `failures` に積み、呼び出し自体は成功扱い。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendExtraction {
    pub records: Vec<BatteryCellRecord>,
    pub failures: Vec<ExtractionFailure>,
}

impl BackendExtraction {
    pub fn new(records: Vec<BatteryCellRecord>, failures: Vec<ExtractionFailure>) -> Self {
        Self { records, failures }
    }
}

pub type BackendResult = std::result::Result<BackendExtraction, BackendFailure>;

#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// このバックエンドが付与する認識方式
    fn method(&self) -> RecognitionMethod;

    /// 設定済みかつ到達可能か（副作用なし）
    fn is_available(&self) -> bool;

    /// 状態表示用
    fn status(&self) -> BackendStatus;

    /// 写真1枚からセルを抽出
    async fn extract(&self, photo: &Photograph) -> BackendResult;
}
