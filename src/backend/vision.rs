//! Claude Vision API バックエンド
//!
//! 写真1枚をまるごと送り、写っている全セルをJSONで列挙させる。
//! レスポンス解析は `battery_oqc_common::parse_vision_response` を使用。

use super::{BackendExtraction, BackendResult, RecognitionBackend};
use crate::config::Config;
use crate::error::{BackendFailure, OqcError, Result};
use crate::scanner::Photograph;
use async_trait::async_trait;
use base64::Engine;
use battery_oqc_common::{
    build_battery_prompt, parse_vision_response, BackendStatus, ExtractionFailure,
    RecognitionMethod,
};
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content<'a> {
    Image { source: ImageSource<'a> },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    media_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClaudeVisionBackend {
    client: Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
    max_image_size: u32,
}

impl ClaudeVisionBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| OqcError::Config(format!("HTTPクライアント初期化失敗: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.api_key().map(str::to_string),
            model: config.model.clone(),
            endpoint: config.api_endpoint.clone(),
            max_image_size: config.max_image_size,
        })
    }

    async fn call_api(&self, api_key: &str, image_b64: String) -> std::result::Result<String, BackendFailure> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: vec![
                    Content::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: "image/jpeg",
                            data: image_b64,
                        },
                    },
                    Content::Text { text: build_battery_prompt() },
                ],
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendFailure::Error(describe_status(status, &body)));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendFailure::Error(format!("レスポンスの形式が不正です: {}", e)))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(BackendFailure::Error("レスポンスにテキストがありません".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl RecognitionBackend for ClaudeVisionBackend {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::VisionAi
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn status(&self) -> BackendStatus {
        let configured = self.api_key.is_some();
        BackendStatus {
            service_name: "Claude Vision API".into(),
            available: configured,
            configured,
            description: if configured {
                "写真全体から全セルを一括認識".into()
            } else {
                "APIキー未設定".into()
            },
            detail: Some(self.model.clone()),
        }
    }

    async fn extract(&self, photo: &Photograph) -> BackendResult {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendFailure::Unavailable(OqcError::MissingApiKey.to_string()))?;

        let image_b64 = encode_photo(photo.path.clone(), self.max_image_size).await?;
        debug!(photo = %photo.file_name, bytes = image_b64.len(), "Vision API 呼び出し");

        let text = self.call_api(api_key, image_b64).await?;
        debug!(photo = %photo.file_name, chars = text.len(), "Vision API レスポンス受信");

        interpret_response(&text, &photo.file_name, Utc::now())
    }
}

/// 読み込み → 縮小 → JPEG → base64
async fn encode_photo(path: PathBuf, max_size: u32) -> std::result::Result<String, BackendFailure> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| BackendFailure::Error(format!("画像読み込みエラー {}: {}", path.display(), e)))?;

    let jpeg = tokio::task::spawn_blocking(move || prepare_jpeg(&bytes, max_size))
        .await
        .map_err(|e| BackendFailure::Error(format!("画像変換タスク失敗: {}", e)))??;

    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

fn prepare_jpeg(bytes: &[u8], max_size: u32) -> std::result::Result<Vec<u8>, BackendFailure> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| BackendFailure::Error(format!("画像デコード失敗: {}", e)))?;

    let img = if img.width() > max_size || img.height() > max_size {
        img.resize(max_size, max_size, FilterType::Lanczos3)
    } else {
        img
    };

    // JPEGはアルファ非対応
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageFormat::Jpeg)
        .map_err(|e| BackendFailure::Error(format!("JPEGエンコード失敗: {}", e)))?;
    Ok(buf.into_inner())
}

/// 接続できない・時間切れは利用不可、それ以外はエラー
fn classify_transport_error(err: reqwest::Error) -> BackendFailure {
    if err.is_connect() || err.is_timeout() {
        BackendFailure::Unavailable(format!("Vision APIに接続できません: {}", err))
    } else {
        BackendFailure::Error(format!("Vision API通信エラー: {}", err))
    }
}

fn describe_status(status: StatusCode, body: &str) -> String {
    let kind = match status.as_u16() {
        401 | 403 => "認証エラー",
        429 => "レート制限",
        500..=599 => "サーバーエラー",
        _ => "APIエラー",
    };
    let snippet: String = body.chars().take(200).collect();
    format!("{} ({}): {}", kind, status, snippet)
}

/// モデルの返答テキストをレコード列に変換
///
/// JSON構造が壊れていれば `BackendFailure::Error`。
/// 個々のセルの欠損・数値不正はそのセルだけ落として `failures` に記録する。
pub fn interpret_response(
    text: &str,
    source_image: &str,
    processed_at: DateTime<Utc>,
) -> BackendResult {
    let response = parse_vision_response(text)
        .map_err(|e| BackendFailure::Error(format!("レスポンス検証失敗: {}", e)))?;

    if !response.notes.is_empty() {
        debug!(photo = source_image, notes = %response.notes, "Vision API 備考");
    }

    let mut extraction = BackendExtraction::default();
    for (index, cell) in response.cells.into_iter().enumerate() {
        match cell {
            Ok(fields) => extraction.records.push(fields.into_record(
                source_image,
                RecognitionMethod::VisionAi,
                processed_at,
            )),
            Err(failure) => {
                warn!(photo = source_image, cell = index, reason = %failure, "セルを除外");
                extraction.failures.push(ExtractionFailure {
                    source_image: source_image.to_string(),
                    region: Some(index),
                    method: RecognitionMethod::VisionAi,
                    reason: failure.to_string(),
                });
            }
        }
    }

    if let Some(total) = response.reported_total {
        if total as usize != extraction.records.len() + extraction.failures.len() {
            info!(
                photo = source_image,
                reported = total,
                listed = extraction.records.len() + extraction.failures.len(),
                "報告セル数と列挙数が一致しません"
            );
        }
    }

    Ok(extraction)
}
