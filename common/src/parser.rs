//! Vision APIレスポンスパーサー
//!
//! Claude等のレスポンスからJSONを抽出し、セルごとに項目を検証する。
//! 構造が壊れている場合はエラー、個々のセルの不備はセル単位の失敗として返す。

use crate::error::{ResponseError, Result};
use crate::field_parser::{normalize_code, parse_measurement, ParseFailure};
use crate::types::{CellField, CellFields};
use serde_json::{Map, Value};

/// パース済みVisionレスポンス
#[derive(Debug, Clone)]
pub struct VisionResponse {
    /// レスポンス内の順序のまま、セルごとの結果
    pub cells: Vec<std::result::Result<CellFields, ParseFailure>>,
    /// モデルが申告したセル数
    pub reported_total: Option<u64>,
    pub notes: String,
}

/// APIレスポンスからJSON部分を抽出
///
/// 抽出優先順位:
/// 1. ```json ... ``` ブロック
/// 2. 生の {...} オブジェクト または [...] 配列（先に現れた方）
/// 3. エラー
///
/// # Examples
/// ```
/// use battery_oqc_common::extract_json;
///
/// let response = "結果: {\"batteries\": []}";
/// let json = extract_json(response).unwrap();
/// assert_eq!(json, "{\"batteries\": []}");
/// ```
pub fn extract_json(response: &str) -> Result<&str> {
    // ```json ... ``` ブロックを探す
    if let Some(start_marker) = response.find("```json") {
        let start = start_marker + 7; // "```json" の長さ
        if let Some(end_offset) = response[start..].find("```") {
            let end = start + end_offset;
            return Ok(response[start..end].trim());
        }
    }

    let object_start = response.find('{');
    let array_start = response.find('[');
    let (start, close) = match (object_start, array_start) {
        (Some(o), Some(a)) if a < o => (a, ']'),
        (Some(o), _) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return Err(ResponseError::NoJson),
    };

    match response.rfind(close) {
        Some(end) if end > start => Ok(&response[start..=end]),
        _ => Err(ResponseError::Unclosed),
    }
}

/// Visionレスポンスをパース
///
/// 受け付ける形式:
/// - `{"batteries": [...], "total_batteries_found": n, "notes": "..."}`
/// - セルの配列 `[...]`
///
/// # Returns
/// * `Ok(VisionResponse)` - 構造が正しい場合（個々のセルは失敗を含みうる）
/// * `Err` - JSONが見つからない・構造が不正な場合
pub fn parse_vision_response(response: &str) -> Result<VisionResponse> {
    let json_str = extract_json(response)?;
    let value: Value = serde_json::from_str(json_str.trim())
        .map_err(|e| ResponseError::InvalidJson(e.to_string()))?;

    let (cells, reported_total, notes) = match &value {
        Value::Object(obj) => {
            let cells = obj
                .get("batteries")
                .or_else(|| obj.get("cells"))
                .and_then(Value::as_array)
                .ok_or(ResponseError::MissingCells)?;
            let total = obj.get("total_batteries_found").and_then(Value::as_u64);
            let notes = obj
                .get("notes")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (cells, total, notes)
        }
        Value::Array(cells) => (cells, None, String::new()),
        _ => return Err(ResponseError::UnexpectedShape),
    };

    Ok(VisionResponse {
        cells: cells.iter().map(cell_from_json).collect(),
        reported_total,
        notes,
    })
}

/// JSONのセル1件を検証して項目に変換
pub fn cell_from_json(value: &Value) -> std::result::Result<CellFields, ParseFailure> {
    let obj = value
        .as_object()
        .ok_or(ParseFailure::MissingField(CellField::SerialNumber))?;

    Ok(CellFields {
        serial_number: code_field(obj, CellField::SerialNumber)?,
        model: code_field(obj, CellField::Model)?,
        energy: numeric_field(obj, CellField::Energy)?,
        capacity: numeric_field(obj, CellField::Capacity)?,
        voltage: numeric_field(obj, CellField::Voltage)?,
    })
}

fn code_field(obj: &Map<String, Value>, field: CellField) -> std::result::Result<String, ParseFailure> {
    let code = match obj.get(&field.to_string()) {
        Some(Value::String(s)) => normalize_code(s),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if code.is_empty() {
        return Err(ParseFailure::MissingField(field));
    }
    Ok(code)
}

fn numeric_field(obj: &Map<String, Value>, field: CellField) -> std::result::Result<f64, ParseFailure> {
    match obj.get(&field.to_string()) {
        None | Some(Value::Null) => Err(ParseFailure::MissingField(field)),
        Some(Value::Number(n)) => {
            let value = n.as_f64().ok_or_else(|| ParseFailure::InvalidNumber {
                field,
                raw: n.to_string(),
            })?;
            if value > 0.0 && value.is_finite() {
                Ok(value)
            } else {
                Err(ParseFailure::NonPositive { field, value })
            }
        }
        Some(Value::String(s)) => parse_measurement(field, s),
        Some(other) => Err(ParseFailure::InvalidNumber {
            field,
            raw: other.to_string(),
        }),
    }
}
