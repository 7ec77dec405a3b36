//! Visionレスポンスの構造エラー
//!
//! セル単位の不備は `ParseFailure`。ここはレスポンス全体を読めない場合のみ。

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseError {
    #[error("JSONが見つかりません")]
    NoJson,

    #[error("JSONが閉じていません")]
    Unclosed,

    #[error("Vision JSONパースエラー: {0}")]
    InvalidJson(String),

    #[error("batteries 配列がありません")]
    MissingCells,

    #[error("JSONの形式が不正です")]
    UnexpectedShape,
}

pub type Result<T> = std::result::Result<T, ResponseError>;
