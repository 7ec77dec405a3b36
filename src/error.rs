use thiserror::Error;

#[derive(Error, Debug)]
pub enum OqcError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIキーが設定されていません。`battery-oqc config --set-api-key YOUR_KEY` または環境変数 ANTHROPIC_API_KEY で設定してください")]
    MissingApiKey,

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("フォルダが見つかりません: {0}")]
    FolderNotFound(String),

    #[error("画像読み込みエラー: {0}")]
    ImageLoad(String),

    #[error("CLI実行エラー: {0}")]
    CliExecution(String),

    #[error("画像が見つかりません: {0}")]
    NoImagesFound(String),

    #[error("利用できる認識バックエンドがありません ({source_image}): {reason}")]
    NoRecognitionBackendAvailable { source_image: String, reason: String },

    #[error("認識処理がキャンセルされました")]
    Cancelled,

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OqcError>;

/// バックエンド1回の呼び出しの失敗
///
/// どちらもフォールバックの対象。実行全体の失敗にはしない。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendFailure {
    /// 未設定・到達不能・タイムアウト
    #[error("バックエンド利用不可: {0}")]
    Unavailable(String),

    /// 呼び出しは行われたが失敗（APIエラー、レスポンス不正、全領域のOCR失敗など）
    #[error("バックエンドエラー: {0}")]
    Error(String),
}
