use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "battery-oqc")]
#[command(about = "電池セル写真のAI/OCR認識・精度検証ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 写真フォルダを認識してJSONを出力
    Process {
        /// 写真フォルダのパス
        #[arg(required = true)]
        folder: PathBuf,

        /// 出力JSONファイル（デフォルト: 入力フォルダ/recognition.json）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// キャッシュを使用（認識済みの写真をスキップ）
        #[arg(long)]
        use_cache: bool,

        /// バッチとして保存（名前省略時は Batch_YYYYMMDD_HHMMSS）
        #[arg(long, value_name = "NAME", num_args = 0..=1, default_missing_value = "")]
        save_batch: Option<String>,

        /// 同時処理数（設定ファイルより優先）
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },

    /// 写真フォルダを認識し、正解データと照合して精度を検証
    Validate {
        /// 写真フォルダのパス
        #[arg(required = true)]
        folder: PathBuf,

        /// 正解データJSON
        #[arg(short, long)]
        expected: PathBuf,

        /// 数値項目の許容相対誤差（例: 0.01 = 1%）
        #[arg(long)]
        tolerance: Option<f64>,

        /// シリアル番号のあいまい一致で許す編集距離
        #[arg(long)]
        max_serial_distance: Option<usize>,

        /// 採点レポートの出力先
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// キャッシュを使用
        #[arg(long)]
        use_cache: bool,
    },

    /// 認識結果JSONと正解データJSONを照合
    Score {
        /// 正解データJSON
        #[arg(short, long)]
        expected: PathBuf,

        /// 認識結果JSON（process の出力、バッチ、レコード配列のいずれか）
        #[arg(short, long)]
        actual: PathBuf,

        /// 数値項目の許容相対誤差
        #[arg(long)]
        tolerance: Option<f64>,

        /// シリアル番号のあいまい一致で許す編集距離
        #[arg(long)]
        max_serial_distance: Option<usize>,

        /// 採点レポートの出力先
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 認識バックエンドの状態を表示
    Status {
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },

    /// 設定を表示/編集
    Config {
        /// APIキーを設定
        #[arg(long)]
        set_api_key: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },

    /// キャッシュ管理
    Cache {
        /// キャッシュを削除
        #[arg(long)]
        clear: bool,

        /// 対象フォルダ（省略時はカレント）
        #[arg(short, long)]
        folder: Option<PathBuf>,

        /// キャッシュ情報を表示
        #[arg(long)]
        info: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process_with_batch_name() {
        let cli = Cli::parse_from(["battery-oqc", "process", "photos", "--save-batch", "line-3"]);
        match cli.command {
            Commands::Process { folder, save_batch, use_cache, .. } => {
                assert_eq!(folder, PathBuf::from("photos"));
                assert_eq!(save_batch.as_deref(), Some("line-3"));
                assert!(!use_cache);
            }
            _ => panic!("process として解析されていない"),
        }
    }

    #[test]
    fn test_parse_process_batch_without_name() {
        let cli = Cli::parse_from(["battery-oqc", "process", "photos", "--save-batch"]);
        match cli.command {
            Commands::Process { save_batch, .. } => assert_eq!(save_batch.as_deref(), Some("")),
            _ => panic!("process として解析されていない"),
        }
    }

    #[test]
    fn test_parse_score() {
        let cli = Cli::parse_from([
            "battery-oqc", "-v", "score", "-e", "expected.json", "-a", "actual.json", "--tolerance", "0.02",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Score { tolerance, max_serial_distance, .. } => {
                assert_eq!(tolerance, Some(0.02));
                assert_eq!(max_serial_distance, None);
            }
            _ => panic!("score として解析されていない"),
        }
    }
}
