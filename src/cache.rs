//! 認識結果キャッシュ
//!
//! 画像内容のSHA-256をキーにセル一覧を保存し、同じ写真の再認識をスキップする。

use crate::error::Result;
use crate::scanner::Photograph;
use battery_oqc_common::{BatteryCellRecord, RecognitionRunResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CACHE_FILE_NAME: &str = ".recognition-cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionCache {
    /// バージョン（互換性チェック用）
    version: u32,
    /// 画像ハッシュ → 認識結果
    entries: HashMap<String, CacheEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub file_name: String,
    pub file_size: u64,
    /// セル0個の写真も空配列として保持する
    pub records: Vec<BatteryCellRecord>,
}

impl RecognitionCache {
    const CURRENT_VERSION: u32 = 1;

    pub fn cache_path(folder: &Path) -> PathBuf {
        folder.join(CACHE_FILE_NAME)
    }

    /// 読めない・バージョン違いの場合は空のキャッシュ
    pub fn load(folder: &Path) -> Self {
        let cache_path = Self::cache_path(folder);
        let file = match File::open(&cache_path) {
            Ok(f) => f,
            Err(_) => return Self::default(),
        };

        match serde_json::from_reader::<_, RecognitionCache>(BufReader::new(file)) {
            Ok(cache) if cache.version == Self::CURRENT_VERSION => cache,
            Ok(_) => {
                warn!("キャッシュバージョン不一致、再生成します");
                Self::default()
            }
            Err(e) => {
                warn!(error = %e, "キャッシュを読み込めません、再生成します");
                Self::default()
            }
        }
    }

    pub fn save(&self, folder: &Path) -> Result<()> {
        let file = File::create(Self::cache_path(folder))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// キャッシュファイルを削除（存在しなければfalse）
    pub fn clear(folder: &Path) -> Result<bool> {
        let cache_path = Self::cache_path(folder);
        if !cache_path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(cache_path)?;
        Ok(true)
    }

    pub fn get(&self, hash: &str) -> Option<&[BatteryCellRecord]> {
        self.entries.get(hash).map(|e| e.records.as_slice())
    }

    pub fn insert(&mut self, hash: String, file_name: String, file_size: u64, records: Vec<BatteryCellRecord>) {
        self.entries.insert(hash, CacheEntry {
            file_name,
            file_size,
            records,
        });
    }

    /// 認識結果を写真ごとに振り分けて登録
    ///
    /// フォールバックも含め成功した写真だけが渡される前提（失敗時は実行全体が失敗する）。
    pub fn store_run(&mut self, photos: &[(Photograph, String)], run: &RecognitionRunResult) {
        for (photo, hash) in photos {
            if hash.is_empty() {
                continue;
            }
            let records: Vec<BatteryCellRecord> = run
                .records
                .iter()
                .filter(|r| r.source_image == photo.file_name)
                .cloned()
                .collect();
            let file_size = std::fs::metadata(&photo.path).map(|m| m.len()).unwrap_or(0);
            self.insert(hash.clone(), photo.file_name.clone(), file_size, records);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecognitionCache {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: HashMap::new(),
        }
    }
}

/// 画像ファイルのSHA-256（16進）
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// キャッシュ済みのレコードと未処理の写真に分ける
///
/// ハッシュ計算に失敗した写真は未処理扱い（ハッシュは空文字）
pub fn split_cached(
    photos: &[Photograph],
    cache: &RecognitionCache,
) -> (Vec<BatteryCellRecord>, Vec<(Photograph, String)>) {
    let mut cached = Vec::new();
    let mut uncached = Vec::new();

    for photo in photos {
        let hash = match compute_file_hash(&photo.path) {
            Ok(h) => h,
            Err(e) => {
                debug!(photo = %photo.file_name, error = %e, "ハッシュ計算失敗");
                uncached.push((photo.clone(), String::new()));
                continue;
            }
        };

        match cache.get(&hash) {
            Some(records) => cached.extend_from_slice(records),
            None => uncached.push((photo.clone(), hash)),
        }
    }

    (cached, uncached)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_file_hash_is_sha256() {
        let dir = tempfile::tempdir().expect("一時ディレクトリ作成失敗");
        let path = dir.path().join("empty.jpg");
        std::fs::write(&path, b"").unwrap();

        let hash = compute_file_hash(&path).unwrap();
        assert_eq!(hash, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn test_clear_missing_cache() {
        let dir = tempfile::tempdir().expect("一時ディレクトリ作成失敗");
        assert!(!RecognitionCache::clear(dir.path()).unwrap());
    }
}
