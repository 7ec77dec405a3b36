//! OCRバックエンド
//!
//! 写真をセルごとの領域に分割し、領域ごとにOCRテキストを取得して
//! `parse_cell_text` でレコード化する。
//!
//! - 領域分割と文字認識はそれぞれ [`Segmenter`] / [`TextRecognizer`] として差し替え可能
//! - 既定実装は固定グリッド分割 [`GridSegmenter`] と tesseract CLI [`TesseractEngine`]

use super::{BackendExtraction, BackendResult, RecognitionBackend};
use crate::config::Config;
use crate::error::{BackendFailure, OqcError, Result};
use crate::scanner::Photograph;
use async_trait::async_trait;
use battery_oqc_common::{parse_cell_text, BackendStatus, ExtractionFailure, RecognitionMethod};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// 写真1枚をセル1個ずつの画像に分割する
pub trait Segmenter: Send + Sync {
    /// 検出できなければ空
    fn segment(&self, image: &DynamicImage) -> Vec<DynamicImage>;
}

/// 画像1枚の文字認識
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn is_available(&self) -> bool;

    fn description(&self) -> String;

    async fn recognize_text(&self, image: &DynamicImage) -> Result<String>;
}

// ========================================
// グリッド分割
// ========================================

/// 固定の行×列グリッドで分割（治具に並べて撮影したラベル写真向け）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSegmenter {
    pub rows: u32,
    pub cols: u32,
}

impl GridSegmenter {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }
}

impl Segmenter for GridSegmenter {
    fn segment(&self, image: &DynamicImage) -> Vec<DynamicImage> {
        let (width, height) = (image.width(), image.height());
        if self.rows == 0 || self.cols == 0 || width < self.cols || height < self.rows {
            return Vec::new();
        }

        let cell_w = width / self.cols;
        let cell_h = height / self.rows;

        (0..self.rows)
            .flat_map(|row| (0..self.cols).map(move |col| (row, col)))
            .map(|(row, col)| image.crop_imm(col * cell_w, row * cell_h, cell_w, cell_h))
            .collect()
    }
}

// ========================================
// tesseract CLI
// ========================================

#[derive(Debug, Clone)]
pub struct TesseractEngine {
    command: String,
    psm: u8,
}

impl TesseractEngine {
    pub fn new(command: impl Into<String>, psm: u8) -> Self {
        Self {
            command: command.into(),
            psm,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tesseract_cmd.clone(), config.tesseract_psm)
    }
}

#[async_trait]
impl TextRecognizer for TesseractEngine {
    fn is_available(&self) -> bool {
        resolve_command(&self.command).is_some()
    }

    fn description(&self) -> String {
        match resolve_command(&self.command) {
            Some(path) => format!("{} (--psm {})", path.display(), self.psm),
            None => format!("{} が見つかりません", self.command),
        }
    }

    async fn recognize_text(&self, image: &DynamicImage) -> Result<String> {
        let png = preprocess(image)?;

        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "--psm"])
            .arg(self.psm.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OqcError::CliExecution(format!("{} の起動に失敗: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).await?;
            // 閉じないと tesseract が入力待ちのまま終わらない
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OqcError::CliExecution(format!(
                "tesseract 異常終了 ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// グレースケール + コントラスト強調してPNG化
fn preprocess(image: &DynamicImage) -> Result<Vec<u8>> {
    let gray = image.grayscale().adjust_contrast(30.0);
    let mut buf = Cursor::new(Vec::new());
    gray.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| OqcError::ImageLoad(format!("PNGエンコード失敗: {}", e)))?;
    Ok(buf.into_inner())
}

/// コマンド名をパスに解決（PATH探索のみ、実行はしない）
fn resolve_command(command: &str) -> Option<PathBuf> {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(command);
        if candidate.is_file() {
            return Some(candidate);
        }
        let exe = dir.join(format!("{}.exe", command));
        exe.is_file().then_some(exe)
    })
}

// ========================================
// バックエンド本体
// ========================================

pub struct OcrBackend {
    segmenter: Arc<dyn Segmenter>,
    recognizer: Arc<dyn TextRecognizer>,
    max_concurrency: usize,
}

impl OcrBackend {
    pub fn new(
        segmenter: Arc<dyn Segmenter>,
        recognizer: Arc<dyn TextRecognizer>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            segmenter,
            recognizer,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(GridSegmenter::new(config.grid_rows, config.grid_cols)),
            Arc::new(TesseractEngine::from_config(config)),
            config.max_concurrency,
        )
    }

    async fn load_regions(&self, path: &Path) -> std::result::Result<Vec<DynamicImage>, BackendFailure> {
        let path = path.to_path_buf();
        let segmenter = Arc::clone(&self.segmenter);

        tokio::task::spawn_blocking(move || {
            image::open(&path)
                .map(|img| segmenter.segment(&img))
                .map_err(|e| BackendFailure::Error(format!("画像読み込みエラー {}: {}", path.display(), e)))
        })
        .await
        .map_err(|e| BackendFailure::Error(format!("領域分割タスク失敗: {}", e)))?
    }
}

#[async_trait]
impl RecognitionBackend for OcrBackend {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Ocr
    }

    fn is_available(&self) -> bool {
        self.recognizer.is_available()
    }

    fn status(&self) -> BackendStatus {
        let available = self.recognizer.is_available();
        BackendStatus {
            service_name: "Tesseract OCR".into(),
            available,
            configured: available,
            description: if available {
                "セル領域ごとに文字認識".into()
            } else {
                "OCRエンジンが見つかりません".into()
            },
            detail: Some(self.recognizer.description()),
        }
    }

    async fn extract(&self, photo: &Photograph) -> BackendResult {
        let regions = self.load_regions(&photo.path).await?;
        let region_count = regions.len();
        debug!(photo = %photo.file_name, regions = region_count, "領域分割完了");

        if region_count == 0 {
            return Ok(BackendExtraction::default());
        }

        let mut outcomes: Vec<(usize, Result<String>)> = stream::iter(regions.into_iter().enumerate())
            .map(|(index, region)| {
                let recognizer = Arc::clone(&self.recognizer);
                async move { (index, recognizer.recognize_text(&region).await) }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let processed_at = Utc::now();
        let mut extraction = BackendExtraction::default();
        let mut engine_failures = 0usize;

        for (index, outcome) in outcomes {
            let failure = |reason: String| ExtractionFailure {
                source_image: photo.file_name.clone(),
                region: Some(index),
                method: RecognitionMethod::Ocr,
                reason,
            };

            match outcome {
                Ok(text) => match parse_cell_text(&text) {
                    Ok(fields) => extraction.records.push(fields.into_record(
                        &photo.file_name,
                        RecognitionMethod::Ocr,
                        processed_at,
                    )),
                    Err(parse_failure) => {
                        debug!(photo = %photo.file_name, region = index, reason = %parse_failure, "領域を除外");
                        extraction.failures.push(failure(parse_failure.to_string()));
                    }
                },
                Err(e) => {
                    warn!(photo = %photo.file_name, region = index, error = %e, "OCR失敗");
                    engine_failures += 1;
                    extraction.failures.push(failure(e.to_string()));
                }
            }
        }

        if engine_failures == region_count {
            return Err(BackendFailure::Error(format!(
                "全{}領域でOCRに失敗しました",
                region_count
            )));
        }

        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_segmenter_splits_evenly() {
        let img = DynamicImage::new_rgb8(400, 200);
        let regions = GridSegmenter::new(2, 4).segment(&img);

        assert_eq!(regions.len(), 8);
        assert!(regions.iter().all(|r| r.width() == 100 && r.height() == 100));
    }

    #[test]
    fn test_grid_segmenter_too_small_image() {
        let img = DynamicImage::new_rgb8(3, 1);
        assert!(GridSegmenter::new(2, 4).segment(&img).is_empty());
    }

    #[test]
    fn test_resolve_missing_command() {
        assert!(resolve_command("battery-oqc-no-such-ocr-engine").is_none());
        assert!(resolve_command("/nonexistent/dir/tesseract").is_none());

        let engine = TesseractEngine::new("battery-oqc-no-such-ocr-engine", 6);
        assert!(!engine.is_available());
        assert!(engine.description().contains("見つかりません"));
    }

    #[test]
    fn test_resolve_explicit_path() {
        let dir = tempfile::tempdir().expect("一時ディレクトリ作成失敗");
        let exe = dir.path().join("fake-tesseract");
        std::fs::write(&exe, b"#!/bin/sh\n").unwrap();

        let resolved = resolve_command(&exe.to_string_lossy());
        assert_eq!(resolved, Some(exe));
    }

    #[test]
    fn test_preprocess_outputs_png() {
        let png = preprocess(&DynamicImage::new_rgb8(10, 10)).expect("前処理失敗");
        assert_eq!(&png[..4], b"\x89PNG");
    }
}
