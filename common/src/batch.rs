//! バッチ集約
//!
//! 認識結果を保存するときに、名前付きバッチとセル一覧にまとめる。
//! 実際の保存先（DB・ファイル）は呼び出し側の責務。

use crate::types::{BatteryCellRecord, RecognitionBatch, RecognitionMethod, RecognitionRunResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 保存単位: バッチ情報 + 所属セル
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedBatch {
    pub batch: RecognitionBatch,
    pub cells: Vec<BatteryCellRecord>,
}

/// 既定のバッチ名（`Batch_YYYYMMDD_HHMMSS`）
pub fn default_batch_name(now: DateTime<Utc>) -> String {
    format!("Batch_{}", now.format("%Y%m%d_%H%M%S"))
}

/// 認識結果をバッチにまとめる
///
/// # Arguments
/// * `name` - バッチ名。None または空文字なら既定名
/// * `run` - 認識結果（所有権を受け取る）
/// * `now` - 作成日時
pub fn aggregate(name: Option<&str>, run: RecognitionRunResult, now: DateTime<Utc>) -> SavedBatch {
    let batch_name = match name.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => default_batch_name(now),
    };

    let count_of = |method: RecognitionMethod| {
        run.records
            .iter()
            .filter(|r| r.recognition_method == Some(method))
            .count()
    };
    let vision_cells = count_of(RecognitionMethod::VisionAi);
    let ocr_cells = count_of(RecognitionMethod::Ocr);

    SavedBatch {
        batch: RecognitionBatch {
            batch_name,
            total_cells: run.records.len(),
            processed_at: now,
            vision_cells,
            ocr_cells,
        },
        cells: run.records,
    }
}
