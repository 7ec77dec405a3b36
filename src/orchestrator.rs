//! 認識オーケストレーター
//!
//! - 実行ごとに一度だけ各バックエンドの可用性を確認し、Vision AI を優先
//! - Vision AI が写真単位で失敗（利用不可・エラー・タイムアウト）したら同じ写真を OCR で再試行
//! - 両方だめな写真が1枚でもあれば実行全体を `NoRecognitionBackendAvailable` で失敗させる
//!   （開始時点でどちらも利用不可なら写真がなくても同じ）
//! - 各レコードには実際に結果を出したバックエンドの方式を記録

use crate::backend::{BackendExtraction, BackendResult, ClaudeVisionBackend, OcrBackend, RecognitionBackend};
use crate::config::Config;
use crate::error::{BackendFailure, OqcError, Result};
use crate::scanner::Photograph;
use battery_oqc_common::{FallbackEvent, RecognitionMethod, RecognitionRunResult, RecognitionStatus};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorOptions {
    /// 同時に処理する写真の枚数
    pub max_concurrency: usize,
    /// バックエンド1回の呼び出しの上限時間
    pub backend_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            backend_timeout: Duration::from_secs(120),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            backend_timeout: config.timeout(),
        }
    }
}

/// 写真1枚分の処理結果
struct PhotoOutcome {
    extraction: BackendExtraction,
    fallback: Option<FallbackEvent>,
}

pub struct RecognitionOrchestrator {
    vision: Arc<dyn RecognitionBackend>,
    ocr: Arc<dyn RecognitionBackend>,
    options: OrchestratorOptions,
}

impl RecognitionOrchestrator {
    pub fn new(
        vision: Arc<dyn RecognitionBackend>,
        ocr: Arc<dyn RecognitionBackend>,
        options: OrchestratorOptions,
    ) -> Self {
        Self { vision, ocr, options }
    }

    /// Claude Vision + Tesseract の既定構成
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Arc::new(ClaudeVisionBackend::new(config)?),
            Arc::new(OcrBackend::from_config(config)),
            OrchestratorOptions::from_config(config),
        ))
    }

    pub fn status(&self) -> RecognitionStatus {
        recognition_status(self.vision.as_ref(), self.ocr.as_ref())
    }

    /// 写真群を認識する
    ///
    /// 結果の並び順は写真の順序と一致しない。キャンセル時は途中結果を返さず `Cancelled`。
    pub async fn process(
        &self,
        photos: &[Photograph],
        cancel: &CancellationToken,
    ) -> Result<RecognitionRunResult> {
        let vision_available = self.vision.is_available();
        let ocr_available = self.ocr.is_available();
        let preferred = select_backend(vision_available, ocr_available);

        info!(
            photos = photos.len(),
            vision_available,
            ocr_available,
            preferred = ?preferred,
            "認識開始"
        );

        // どちらも使えないことは呼び出し前に分かるため、写真が0枚でも失敗させる
        let Some(preferred) = preferred else {
            return Err(OqcError::NoRecognitionBackendAvailable {
                source_image: photos
                    .first()
                    .map(|p| p.file_name.clone())
                    .unwrap_or_else(|| "-".into()),
                reason: "VisionAI: 利用不可 / OCR: 利用不可".into(),
            });
        };

        let mut run = RecognitionRunResult::empty(preferred, Utc::now());

        let work = stream::iter(photos)
            .map(|photo| self.recognize_photo(photo, vision_available, ocr_available))
            .buffer_unordered(self.options.max_concurrency.max(1));
        tokio::pin!(work);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("認識処理をキャンセルしました");
                    return Err(OqcError::Cancelled);
                }
                next = work.next() => match next {
                    Some(outcome) => {
                        let outcome = outcome?;
                        run.records.extend(outcome.extraction.records);
                        run.failures.extend(outcome.extraction.failures);
                        run.fallbacks.extend(outcome.fallback);
                    }
                    None => break,
                },
            }
        }

        info!(
            cells = run.total_cells(),
            fallbacks = run.fallbacks.len(),
            warnings = run.warning_count(),
            "認識完了"
        );
        Ok(run)
    }

    async fn recognize_photo(
        &self,
        photo: &Photograph,
        vision_available: bool,
        ocr_available: bool,
    ) -> Result<PhotoOutcome> {
        let mut reasons = Vec::new();
        let mut vision_failure = None;

        if vision_available {
            match self.invoke(self.vision.as_ref(), photo).await {
                Ok(extraction) => {
                    return Ok(PhotoOutcome {
                        extraction,
                        fallback: None,
                    })
                }
                Err(failure) => {
                    warn!(photo = %photo.file_name, reason = %failure, "Vision AI 失敗、OCRにフォールバック");
                    reasons.push(format!("VisionAI: {}", failure));
                    vision_failure = Some(failure);
                }
            }
        } else {
            reasons.push("VisionAI: 利用不可".to_string());
        }

        if ocr_available {
            match self.invoke(self.ocr.as_ref(), photo).await {
                Ok(extraction) => {
                    let fallback = vision_failure.map(|failure| FallbackEvent {
                        source_image: photo.file_name.clone(),
                        reason: failure.to_string(),
                    });
                    return Ok(PhotoOutcome { extraction, fallback });
                }
                Err(failure) => {
                    warn!(photo = %photo.file_name, reason = %failure, "OCR 失敗");
                    reasons.push(format!("OCR: {}", failure));
                }
            }
        } else {
            reasons.push("OCR: 利用不可".to_string());
        }

        Err(OqcError::NoRecognitionBackendAvailable {
            source_image: photo.file_name.clone(),
            reason: reasons.join(" / "),
        })
    }

    /// タイムアウト付きで呼び出し、結果のレコードに方式・出所・日時を付与
    async fn invoke(&self, backend: &dyn RecognitionBackend, photo: &Photograph) -> BackendResult {
        let method = backend.method();
        let timeout = self.options.backend_timeout;

        let mut extraction = match tokio::time::timeout(timeout, backend.extract(photo)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendFailure::Unavailable(format!(
                    "{} がタイムアウトしました ({:?})",
                    method, timeout
                )))
            }
        };

        let now = Utc::now();
        for record in &mut extraction.records {
            record.recognition_method = Some(method);
            if record.source_image.is_empty() {
                record.source_image = photo.file_name.clone();
            }
            record.processed_at.get_or_insert(now);
        }

        debug!(photo = %photo.file_name, method = %method, cells = extraction.records.len(), "抽出完了");
        Ok(extraction)
    }
}

/// 優先する認識方式（どちらも使えなければNone）
pub fn select_backend(vision_available: bool, ocr_available: bool) -> Option<RecognitionMethod> {
    if vision_available {
        Some(RecognitionMethod::VisionAi)
    } else if ocr_available {
        Some(RecognitionMethod::Ocr)
    } else {
        None
    }
}

/// 現在の設定から状態を組み立てる（キャッシュしない）
pub fn recognition_status(
    vision: &dyn RecognitionBackend,
    ocr: &dyn RecognitionBackend,
) -> RecognitionStatus {
    let vision_ai = vision.status();
    let ocr = ocr.status();
    let preferred_method = select_backend(vision_ai.available, ocr.available);

    RecognitionStatus {
        vision_ai,
        ocr,
        preferred_method,
    }
}
