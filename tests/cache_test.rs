//! キャッシュ機能テスト
//!
//! 認識結果キャッシュの動作を検証

use battery_oqc::cache::{compute_file_hash, split_cached, RecognitionCache};
use battery_oqc::Photograph;
use battery_oqc_common::{BatteryCellRecord, RecognitionMethod, RecognitionRunResult};
use chrono::Utc;
use tempfile::tempdir;

fn record(serial: &str, source_image: &str) -> BatteryCellRecord {
    let mut record = BatteryCellRecord::expected(serial, "6754E4", 36.72, 10.8, 3.40);
    record.recognition_method = Some(RecognitionMethod::VisionAi);
    record.source_image = source_image.to_string();
    record
}

/// 空のキャッシュファイル
#[test]
fn test_cache_file_empty() {
    let dir = tempdir().expect("Failed to create temp dir");
    let cache = RecognitionCache::load(dir.path());

    assert_eq!(cache.len(), 0);
    assert!(cache.is_empty());
}

/// キャッシュの保存と読み込み
#[test]
fn test_cache_save_and_load() {
    let dir = tempdir().expect("Failed to create temp dir");

    let mut cache = RecognitionCache::load(dir.path());
    cache.insert(
        "abc123".to_string(),
        "P1.jpg".to_string(),
        1024,
        vec![record("C048026", "P1.jpg"), record("C044817", "P1.jpg")],
    );
    cache.save(dir.path()).expect("キャッシュ保存失敗");

    let loaded = RecognitionCache::load(dir.path());
    assert_eq!(loaded.len(), 1);

    let cached = loaded.get("abc123").expect("キャッシュが見つからない");
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[1].serial_number, "C044817");
    assert_eq!(cached[0].recognition_method, Some(RecognitionMethod::VisionAi));
}

/// キャッシュの上書き
#[test]
fn test_cache_overwrite() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut cache = RecognitionCache::load(dir.path());

    cache.insert("same".to_string(), "P1.jpg".to_string(), 10, vec![record("C048026", "P1.jpg")]);
    cache.insert("same".to_string(), "P1.jpg".to_string(), 10, Vec::new());

    assert_eq!(cache.len(), 1);
    assert!(cache.get("same").expect("キャッシュが見つからない").is_empty());
}

/// キャッシュファイルが破損している場合
#[test]
fn test_cache_corrupted_file() {
    let dir = tempdir().expect("Failed to create temp dir");
    std::fs::write(RecognitionCache::cache_path(dir.path()), "{ invalid json }").unwrap();

    let cache = RecognitionCache::load(dir.path());
    assert!(cache.is_empty());
}

/// バージョン違いは空扱い
#[test]
fn test_cache_version_mismatch() {
    let dir = tempdir().expect("Failed to create temp dir");
    std::fs::write(
        RecognitionCache::cache_path(dir.path()),
        r#"{"version": 99, "entries": {"h": {"file_name": "P1.jpg", "file_size": 1, "records": []}}}"#,
    )
    .unwrap();

    assert!(RecognitionCache::load(dir.path()).is_empty());
}

/// キャッシュ済み / 未処理の振り分けと、認識結果の登録
#[test]
fn test_split_and_store_run() {
    let dir = tempdir().expect("Failed to create temp dir");
    let p1 = dir.path().join("P1.jpg");
    let p2 = dir.path().join("P2.jpg");
    std::fs::write(&p1, b"fake image 1").unwrap();
    std::fs::write(&p2, b"fake image 2").unwrap();
    let photos = vec![Photograph::new(&p1), Photograph::new(&p2)];

    // 空のキャッシュ → 全て未処理
    let mut cache = RecognitionCache::load(dir.path());
    let (cached, uncached) = split_cached(&photos, &cache);
    assert!(cached.is_empty());
    assert_eq!(uncached.len(), 2);
    assert_eq!(uncached[0].1, compute_file_hash(&p1).unwrap());

    // P1 は2セル、P2 は0セル
    let mut run = RecognitionRunResult::empty(RecognitionMethod::VisionAi, Utc::now());
    run.records = vec![record("C048026", "P1.jpg"), record("C044817", "P1.jpg")];
    cache.store_run(&uncached, &run);
    cache.save(dir.path()).expect("保存失敗");

    let reloaded = RecognitionCache::load(dir.path());
    let (cached, uncached) = split_cached(&photos, &reloaded);
    assert_eq!(cached.len(), 2);
    assert!(uncached.is_empty(), "セル0個の写真もキャッシュされる");
}

/// 内容が変わった写真は再処理
#[test]
fn test_changed_photo_is_uncached() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("P1.jpg");
    std::fs::write(&path, b"before").unwrap();
    let photos = vec![Photograph::new(&path)];

    let mut cache = RecognitionCache::default();
    cache.insert(compute_file_hash(&path).unwrap(), "P1.jpg".into(), 6, vec![record("C048026", "P1.jpg")]);

    std::fs::write(&path, b"after!").unwrap();
    let (cached, uncached) = split_cached(&photos, &cache);
    assert!(cached.is_empty());
    assert_eq!(uncached.len(), 1);
}

/// キャッシュ削除
#[test]
fn test_cache_clear() {
    let dir = tempdir().expect("Failed to create temp dir");
    RecognitionCache::default().save(dir.path()).expect("保存失敗");

    assert!(RecognitionCache::clear(dir.path()).expect("削除失敗"));
    assert!(!RecognitionCache::cache_path(dir.path()).exists());
    assert!(!RecognitionCache::clear(dir.path()).expect("削除失敗"));
}
