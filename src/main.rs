use battery_oqc::cache::{self, RecognitionCache};
use battery_oqc::{cli, config, error, export, logging, scanner};
use battery_oqc::RecognitionOrchestrator;
use battery_oqc_common::{aggregate, score, MatchReport, RecognitionMethod, RecognitionRunResult, ScoringConfig};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use error::{OqcError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let mut config = Config::load()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Process { folder, output, use_cache, save_batch, concurrency } => {
            println!("🔋 battery-oqc - セル認識\n");

            if let Some(n) = concurrency {
                config.max_concurrency = n.max(1);
            }

            let run = recognize_folder(&config, &folder, use_cache, &cancel).await?;
            print_run_summary(&run);

            let output = output.unwrap_or_else(|| folder.join("recognition.json"));
            export::write_json(&run, &output)?;
            println!("✔ 結果を保存: {}", output.display());

            if let Some(name) = save_batch {
                let saved = aggregate(Some(name.as_str()), run, Utc::now());
                let path = export::batch_output_path(&folder, &saved.batch.batch_name);
                export::write_json(&saved, &path)?;
                println!(
                    "✔ バッチを保存: {} ({}セル) → {}",
                    saved.batch.batch_name,
                    saved.batch.total_cells,
                    path.display()
                );
            }

            println!("\n✅ 認識完了");
        }

        Commands::Validate { folder, expected, tolerance, max_serial_distance, output, use_cache } => {
            println!("🔋 battery-oqc - 精度検証\n");

            let expected_records = export::load_records(&expected)?;
            println!("✔ 正解データ: {}セル\n", expected_records.len());

            let run = recognize_folder(&config, &folder, use_cache, &cancel).await?;
            print_run_summary(&run);

            let scoring = scoring_config(&config, tolerance, max_serial_distance);
            let report = score(&expected_records, &run.records, &scoring);
            print_report(&report);

            if let Some(output) = output {
                export::write_json(&report, &output)?;
                println!("✔ レポートを保存: {}", output.display());
            }
        }

        Commands::Score { expected, actual, tolerance, max_serial_distance, output } => {
            println!("🔋 battery-oqc - 照合\n");

            let expected_records = export::load_records(&expected)?;
            let actual_records = export::load_records(&actual)?;

            let scoring = scoring_config(&config, tolerance, max_serial_distance);
            let report = score(&expected_records, &actual_records, &scoring);
            print_report(&report);

            if let Some(output) = output {
                export::write_json(&report, &output)?;
                println!("✔ レポートを保存: {}", output.display());
            }
        }

        Commands::Status { json } => {
            let orchestrator = RecognitionOrchestrator::from_config(&config)?;
            let status = orchestrator.status();

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("認識バックエンド:");
                for backend in [&status.vision_ai, &status.ocr] {
                    println!(
                        "  {} {}: {}{}",
                        if backend.available { "✔" } else { "✘" },
                        backend.service_name,
                        backend.description,
                        backend.detail.as_deref().map(|d| format!(" [{}]", d)).unwrap_or_default()
                    );
                }
                match status.preferred_method {
                    Some(method) => println!("  優先方式: {}", method),
                    None => println!("  優先方式: なし（利用できるバックエンドがありません）"),
                }
            }
        }

        Commands::Config { set_api_key, show } => {
            if let Some(key) = set_api_key {
                config.set_api_key(key)?;
                println!("✔ APIキーを設定しました");
            }

            if show {
                println!("設定:");
                println!("  モデル: {}", config.model);
                println!("  APIエンドポイント: {}", config.api_endpoint);
                println!("  最大画像サイズ: {}px", config.max_image_size);
                println!("  タイムアウト: {}秒", config.timeout_seconds);
                println!("  同時処理数: {}", config.max_concurrency);
                println!("  OCRコマンド: {} (--psm {})", config.tesseract_cmd, config.tesseract_psm);
                println!("  分割グリッド: {}行 x {}列", config.grid_rows, config.grid_cols);
                println!("  許容誤差: {}", config.numeric_tolerance);
                println!("  シリアル許容距離: {}", config.max_serial_distance);
                println!("  APIキー: {}", if config.api_key().is_some() { "設定済み" } else { "未設定" });
            }
        }

        Commands::Cache { clear, folder, info } => {
            let target = folder.unwrap_or_else(|| PathBuf::from("."));
            let cache_path = RecognitionCache::cache_path(&target);

            if info || !clear {
                if cache_path.exists() {
                    let cache = RecognitionCache::load(&target);
                    println!("キャッシュ情報:");
                    println!("  パス: {}", cache_path.display());
                    println!("  件数: {}", cache.len());
                    if let Ok(meta) = std::fs::metadata(&cache_path) {
                        println!("  サイズ: {} bytes", meta.len());
                    }
                } else {
                    println!("キャッシュファイルが存在しません: {}", cache_path.display());
                }
            }

            if clear {
                match RecognitionCache::clear(&target) {
                    Ok(true) => println!("✔ キャッシュを削除しました: {}", cache_path.display()),
                    Ok(false) => println!("キャッシュファイルが存在しません"),
                    Err(e) => println!("キャッシュ削除エラー: {}", e),
                }
            }
        }
    }

    Ok(())
}

/// フォルダをスキャンして認識（キャッシュ有効時はキャッシュ済み写真をスキップ）
async fn recognize_folder(
    config: &Config,
    folder: &Path,
    use_cache: bool,
    cancel: &CancellationToken,
) -> Result<RecognitionRunResult> {
    println!("[1/2] 写真をスキャン中...");
    let photos = scanner::scan_folder(folder)?;
    println!("✔ {}枚の写真を検出\n", photos.len());

    if photos.is_empty() {
        return Err(OqcError::NoImagesFound(folder.display().to_string()));
    }

    let orchestrator = RecognitionOrchestrator::from_config(config)?;

    println!("[2/2] 認識中...{}", if use_cache { " (キャッシュ有効)" } else { "" });
    if !use_cache {
        return orchestrator.process(&photos, cancel).await;
    }

    let mut recognition_cache = RecognitionCache::load(folder);
    let (cached_records, uncached) = cache::split_cached(&photos, &recognition_cache);
    println!("  キャッシュ済み: {}枚 / 未処理: {}枚", photos.len() - uncached.len(), uncached.len());

    // 全件キャッシュ済みならバックエンドを呼ばない
    let mut run = if uncached.is_empty() {
        let preferred = orchestrator.status().preferred_method.unwrap_or(RecognitionMethod::Unknown);
        RecognitionRunResult::empty(preferred, Utc::now())
    } else {
        let targets: Vec<_> = uncached.iter().map(|(photo, _)| photo.clone()).collect();
        orchestrator.process(&targets, cancel).await?
    };

    recognition_cache.store_run(&uncached, &run);
    recognition_cache.save(folder)?;

    run.records.extend(cached_records);
    Ok(run)
}

fn scoring_config(config: &Config, tolerance: Option<f64>, max_serial_distance: Option<usize>) -> ScoringConfig {
    let mut scoring = config.scoring();
    if let Some(t) = tolerance {
        scoring.numeric_tolerance = t;
    }
    if let Some(d) = max_serial_distance {
        scoring.max_serial_distance = d;
    }
    scoring
}

fn print_run_summary(run: &RecognitionRunResult) {
    let methods: Vec<String> = run.methods_used().iter().map(|m| m.to_string()).collect();
    println!("✔ {}セルを認識 (優先: {}, 使用: {})", run.total_cells(), run.preferred_method, methods.join(", "));

    for fallback in &run.fallbacks {
        println!("  ⚠ {} はOCRにフォールバック: {}", fallback.source_image, fallback.reason);
    }
    if run.warning_count() > 0 {
        println!("  ⚠ 警告 {}件（除外したセルを含む）", run.warning_count());
    }
    println!();
}

fn print_report(report: &MatchReport) {
    println!("照合結果:");
    for pair in &report.pairs {
        println!(
            "  {} ↔ {}  {:.3}  {}",
            pair.expected.serial_number,
            pair.actual.serial_number,
            pair.overall_score,
            pair.classification
        );
    }
    for missed in &report.missed {
        println!("  ✘ 未検出: {}", missed.serial_number);
    }
    for spurious in &report.spurious {
        println!("  ✘ 余分: {} ({})", spurious.serial_number, spurious.source_image);
    }

    let summary = report.summary();
    println!(
        "\n  完全一致 {} / 優秀 {} / 良好 {} / 基本 {} / 不一致 {}",
        summary.perfect, summary.excellent, summary.good, summary.basic, summary.failed
    );
    println!(
        "  セル数: 期待 {} / 認識 {} ({})",
        report.expected_count,
        report.actual_count,
        if report.count_matches { "一致" } else { "不一致" }
    );
    println!("  平均スコア: {:.3}", summary.mean_score);
}
