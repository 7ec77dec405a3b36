//! JSON入出力
//!
//! 認識結果・保存バッチ・採点レポートをJSONで書き出し、
//! 正解データや過去の認識結果をレコード列として読み込む。

use crate::error::{OqcError, Result};
use battery_oqc_common::BatteryCellRecord;
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// レコード列を読み込む
///
/// 次のどれでも受け付ける:
/// - レコードの配列
/// - 認識結果 `{"records": [...]}`
/// - 保存バッチ `{"batch": {...}, "cells": [...]}`
pub fn load_records(path: &Path) -> Result<Vec<BatteryCellRecord>> {
    if !path.is_file() {
        return Err(OqcError::FileNotFound(path.display().to_string()));
    }

    let value: Value = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    let list = match value {
        Value::Array(list) => Value::Array(list),
        Value::Object(mut map) => match map.remove("records").or_else(|| map.remove("cells")) {
            Some(list) => list,
            None => {
                return Err(OqcError::Config(format!(
                    "{} にレコード一覧（records / cells）がありません",
                    path.display()
                )))
            }
        },
        _ => {
            return Err(OqcError::Config(format!(
                "{} の形式が不正です",
                path.display()
            )))
        }
    };

    Ok(serde_json::from_value(list)?)
}

/// バッチ保存先（`<folder>/<batch_name>.json`）
pub fn batch_output_path(folder: &Path, batch_name: &str) -> PathBuf {
    let safe: String = batch_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    folder.join(format!("{}.json", safe))
}
