//! ラベル文字列パーサー
//!
//! OCRで読み取ったセルラベルのテキストから5項目を取り出す。
//! - シリアル番号: `S/N: C048026` のようなラベル付き表記、なければ `C048026` 形式
//! - 型番: `MODEL: 6754E4` のようなラベル付き表記、なければ `6754E4` 形式
//! - エネルギー/容量/電圧: 単位付きの数値（`36.72Wh`, `10.8Ah`, `3.40V`）
//!
//! 内部状態を持たないため、同じ入力には常に同じ結果を返す。

use crate::types::{CellField, CellFields};
use regex::Regex;
use thiserror::Error;

/// 1セル分のパース失敗
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("{0} が見つかりません")]
    MissingField(CellField),

    #[error("{field} の数値が不正: {raw}")]
    InvalidNumber { field: CellField, raw: String },

    #[error("{field} の候補が複数あります: {}", .candidates.join(", "))]
    Ambiguous { field: CellField, candidates: Vec<String> },

    #[error("{field} が正の値ではありません: {value}")]
    NonPositive { field: CellField, value: f64 },
}

impl ParseFailure {
    pub fn field(&self) -> CellField {
        match self {
            ParseFailure::MissingField(field) => *field,
            ParseFailure::InvalidNumber { field, .. } => *field,
            ParseFailure::Ambiguous { field, .. } => *field,
            ParseFailure::NonPositive { field, .. } => *field,
        }
    }
}

lazy_static::lazy_static! {
    static ref LABELED_SERIAL_RE: Regex = Regex::new(
        r"(?i)\b(?:S/?N|SERIAL(?:\s*(?:NO|NUMBER))?)\.?\s*[:：#]?\s*([A-Z0-9]{5,})"
    ).unwrap();
    static ref SERIAL_RE: Regex = Regex::new(r"(?i)\b([A-Z]\d{6,7})\b").unwrap();
    static ref LABELED_MODEL_RE: Regex = Regex::new(
        r"(?i)\bMODEL(?:\s*(?:NO|NUMBER))?\.?\s*[:：#]?\s*([A-Z0-9][A-Z0-9\-]{2,})"
    ).unwrap();
    static ref MODEL_RE: Regex = Regex::new(r"(?i)\b(\d{4}[A-Z]\d)\b").unwrap();
    static ref ENERGY_RE: Regex = Regex::new(r"(?i)(\d(?:[\d.,]*\d)?)\s*(m?Wh)([A-Z]*)").unwrap();
    static ref CAPACITY_RE: Regex = Regex::new(r"(?i)(\d(?:[\d.,]*\d)?)\s*(m?Ah)([A-Z]*)").unwrap();
    static ref VOLTAGE_RE: Regex = Regex::new(r"(?i)(\d(?:[\d.,]*\d)?)\s*(m?V)([A-Z]*)").unwrap();
    static ref MEASUREMENT_RE: Regex = Regex::new(r"^([+-]?\d(?:[\d.,]*\d)?)\s*([A-Za-z]*)$").unwrap();
}

/// 単位の直後に続いてよい英字（`3.40VDC`, `10.8Ahr`）
const UNIT_SUFFIXES: [&str; 3] = ["", "DC", "R"];

/// OCRテキストから1セル分の項目を取り出す
///
/// # Arguments
/// * `raw_text` - 1セル分の領域から得たOCRテキスト
///
/// # Returns
/// * `Ok(CellFields)` - 5項目すべて取得できた場合
/// * `Err(ParseFailure)` - いずれかの必須項目が欠落・不正・曖昧な場合
pub fn parse_cell_text(raw_text: &str) -> Result<CellFields, ParseFailure> {
    let serial_number = extract_code(
        raw_text,
        CellField::SerialNumber,
        &LABELED_SERIAL_RE,
        &SERIAL_RE,
    )?;
    let model = extract_code(raw_text, CellField::Model, &LABELED_MODEL_RE, &MODEL_RE)?;
    let energy = extract_measurement(raw_text, CellField::Energy, &ENERGY_RE)?;
    let capacity = extract_measurement(raw_text, CellField::Capacity, &CAPACITY_RE)?;
    let voltage = extract_measurement(raw_text, CellField::Voltage, &VOLTAGE_RE)?;

    Ok(CellFields {
        serial_number,
        model,
        energy,
        capacity,
        voltage,
    })
}

/// 英数字コードを正規化（大文字化・空白除去）
pub fn normalize_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// 単位付きの数値をパース
///
/// 単位は項目の単位（大文字小文字無視）またはミリ単位（`mAh` など、1/1000に換算）を受け付ける。
/// 単位なしの数値も可。数値以外の断片は0扱いせずエラーにする。
pub fn parse_measurement(field: CellField, raw: &str) -> Result<f64, ParseFailure> {
    let invalid = || ParseFailure::InvalidNumber {
        field,
        raw: raw.to_string(),
    };

    let caps = MEASUREMENT_RE.captures(raw.trim()).ok_or_else(invalid)?;
    let number = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or_default();

    let divisor = unit_divisor(field, unit).ok_or_else(invalid)?;
    let value = parse_number(number).ok_or_else(invalid)? / divisor;

    if value <= 0.0 {
        return Err(ParseFailure::NonPositive { field, value });
    }
    Ok(value)
}

/// ロケール差を吸収して数値をパース
///
/// - `36.72` / `36,72` はどちらも小数
/// - カンマが複数あり、すべて3桁区切りなら桁区切り（`12,000,000`）
/// - `1,234.5` / `1.234,5` のように両方ある場合は後ろ側を小数点とみなす
/// - カンマ1つの後にちょうど3桁（`3,400`）は小数とも桁区切りとも読めるのでNone
/// - 判別できない表記はNone
pub fn parse_number(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, s.strip_prefix('+').unwrap_or(s)),
    };

    if !digits.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }

    let commas = digits.matches(',').count();
    let dots = digits.matches('.').count();

    let canonical = match (commas, dots) {
        (0, 0) | (0, 1) => digits.to_string(),
        (0, _) => join_thousands(digits, '.')?,
        (1, 0) => {
            let (_, fraction) = digits.split_once(',')?;
            if fraction.len() == 3 {
                return None;
            }
            digits.replace(',', ".")
        }
        (_, 0) => join_thousands(digits, ',')?,
        _ => {
            let last_comma = digits.rfind(',')?;
            let last_dot = digits.rfind('.')?;
            let (decimal, thousands) = if last_dot > last_comma { ('.', ',') } else { (',', '.') };
            if digits.matches(decimal).count() != 1 {
                return None;
            }
            let decimal_pos = digits.rfind(decimal)?;
            let integer_part = &digits[..decimal_pos];
            let fraction = &digits[decimal_pos + 1..];
            if !has_thousand_groups(integer_part, thousands) {
                return None;
            }
            format!("{}.{}", integer_part.replace(thousands, ""), fraction)
        }
    };

    let value: f64 = canonical.parse().ok()?;
    if value.is_finite() {
        Some(sign * value)
    } else {
        None
    }
}

fn has_thousand_groups(s: &str, sep: char) -> bool {
    let mut groups = s.split(sep);
    let head = groups.next().unwrap_or_default();
    if head.is_empty() || head.len() > 3 {
        return false;
    }
    let mut any = false;
    for group in groups {
        if group.len() != 3 {
            return false;
        }
        any = true;
    }
    any
}

fn join_thousands(s: &str, sep: char) -> Option<String> {
    if has_thousand_groups(s, sep) {
        Some(s.replace(sep, ""))
    } else {
        None
    }
}

fn unit_divisor(field: CellField, unit: &str) -> Option<f64> {
    if unit.is_empty() {
        return Some(1.0);
    }
    let expected = field.unit()?;
    if unit.eq_ignore_ascii_case(expected) {
        return Some(1.0);
    }
    let milli = format!("m{}", expected);
    // mWh/mAh/mV は大文字小文字を区別（MV等の誤読を避ける）
    if unit == milli {
        return Some(1000.0);
    }
    None
}

fn extract_code(
    text: &str,
    field: CellField,
    labeled: &Regex,
    pattern: &Regex,
) -> Result<String, ParseFailure> {
    // ラベル付き表記を優先。数字を含まない語（`NUMBER` 等）はコードとみなさない
    let mut candidates = distinct(
        labeled
            .captures_iter(text)
            .map(|c| normalize_code(&c[1]))
            .filter(|code| code.chars().any(|ch| ch.is_ascii_digit())),
    );
    if candidates.is_empty() {
        candidates = distinct(pattern.captures_iter(text).map(|c| normalize_code(&c[1])));
    }

    match candidates.len() {
        0 => Err(ParseFailure::MissingField(field)),
        1 => Ok(candidates.remove(0)),
        _ => Err(ParseFailure::Ambiguous { field, candidates }),
    }
}

fn extract_measurement(text: &str, field: CellField, pattern: &Regex) -> Result<f64, ParseFailure> {
    let mut values: Vec<f64> = Vec::new();
    let mut first_error: Option<ParseFailure> = None;

    for caps in pattern.captures_iter(text) {
        // `3.40Vmax` のように別の語に続く単位は対象外
        if !UNIT_SUFFIXES.iter().any(|s| caps[3].eq_ignore_ascii_case(s)) {
            continue;
        }
        let raw = format!("{}{}", &caps[1], &caps[2]);
        match parse_measurement(field, &raw) {
            Ok(v) => {
                if !values.iter().any(|existing| *existing == v) {
                    values.push(v);
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match values.len() {
        0 => Err(first_error.unwrap_or(ParseFailure::MissingField(field))),
        1 => Ok(values[0]),
        _ => Err(ParseFailure::Ambiguous {
            field,
            candidates: values.iter().map(|v| v.to_string()).collect(),
        }),
    }
}

fn distinct(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}
