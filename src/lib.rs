//! 電池セル写真の認識オーケストレーション
//!
//! Vision AI（Claude）を優先し、失敗時は OCR（Tesseract）にフォールバックする。
//! 純粋なロジックは `battery_oqc_common` にある。

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod orchestrator;
pub mod scanner;

pub use backend::{BackendExtraction, RecognitionBackend};
pub use error::{BackendFailure, OqcError, Result};
pub use orchestrator::{recognition_status, select_backend, OrchestratorOptions, RecognitionOrchestrator};
pub use scanner::{scan_folder, Photograph};
