//! 認識精度の採点
//!
//! 期待値（正解データ）と認識結果をシリアル番号で対応付け、項目ごとに一致度を計算する。
//! 入力の順序には依存しない。I/Oも副作用も持たない。
//! シリアル番号・型番はパーサーと同じ正規化（大文字化・空白除去）をしてから比較する。

use crate::field_parser::normalize_code;
use crate::types::{BatteryCellRecord, CellField};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 分類の閾値
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationThresholds {
    pub excellent: f64,
    pub good: f64,
    pub basic: f64,
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self {
            excellent: 0.9,
            good: 0.7,
            basic: 0.6,
        }
    }
}

/// 採点設定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// 許容できる最大相対誤差（この差で数値項目のスコアが0になる）
    pub numeric_tolerance: f64,
    /// シリアル番号の編集距離がこれを超えると対応なしとみなす
    pub max_serial_distance: usize,
    #[serde(default)]
    pub thresholds: ClassificationThresholds,
}

impl ScoringConfig {
    pub fn new(numeric_tolerance: f64, max_serial_distance: usize) -> Self {
        Self {
            numeric_tolerance,
            max_serial_distance,
            thresholds: ClassificationThresholds::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self::new(0.01, 2)
    }
}

/// 一致度の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Classification {
    Perfect,
    Excellent,
    Good,
    Basic,
    Failed,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Perfect => write!(f, "完全一致"),
            Classification::Excellent => write!(f, "優秀"),
            Classification::Good => write!(f, "良好"),
            Classification::Basic => write!(f, "基本"),
            Classification::Failed => write!(f, "不一致"),
        }
    }
}

/// 項目ごとのスコア（0.0〜1.0）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldScores {
    pub serial_number: f64,
    pub model: f64,
    pub energy: f64,
    pub capacity: f64,
    pub voltage: f64,
}

impl FieldScores {
    pub fn get(&self, field: CellField) -> f64 {
        match field {
            CellField::SerialNumber => self.serial_number,
            CellField::Model => self.model,
            CellField::Energy => self.energy,
            CellField::Capacity => self.capacity,
            CellField::Voltage => self.voltage,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellField, f64)> + '_ {
        CellField::ALL.iter().map(move |f| (*f, self.get(*f)))
    }

    /// 5項目の算術平均
    pub fn mean(&self) -> f64 {
        self.iter().map(|(_, s)| s).sum::<f64>() / CellField::ALL.len() as f64
    }
}

/// 期待値と認識結果1組の採点結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairReport {
    pub expected: BatteryCellRecord,
    pub actual: BatteryCellRecord,
    pub serial_distance: usize,
    pub field_scores: FieldScores,
    pub overall_score: f64,
    pub classification: Classification,
}

/// 集計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub perfect: usize,
    pub excellent: usize,
    pub good: usize,
    pub basic: usize,
    pub failed: usize,
    pub missed: usize,
    pub spurious: usize,
    pub count_matches: bool,
    pub mean_score: f64,
}

/// 採点レポート
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub pairs: Vec<PairReport>,
    /// 対応する認識結果がない期待値
    pub missed: Vec<BatteryCellRecord>,
    /// 対応する期待値がない認識結果
    pub spurious: Vec<BatteryCellRecord>,
    pub expected_count: usize,
    pub actual_count: usize,
    /// 件数が一致したか
    pub count_matches: bool,
}

impl MatchReport {
    pub fn count(&self, classification: Classification) -> usize {
        self.pairs
            .iter()
            .filter(|p| p.classification == classification)
            .count()
    }

    /// 期待値1件あたりの平均スコア（未検出は0点）
    pub fn mean_score(&self) -> f64 {
        if self.expected_count == 0 {
            return if self.actual_count == 0 { 1.0 } else { 0.0 };
        }
        let total: f64 = self.pairs.iter().map(|p| p.overall_score).sum();
        total / self.expected_count as f64
    }

    pub fn pair_for(&self, expected_serial: &str) -> Option<&PairReport> {
        let serial = normalize_code(expected_serial);
        self.pairs
            .iter()
            .find(|p| normalize_code(&p.expected.serial_number) == serial)
    }

    pub fn summary(&self) -> ScoreSummary {
        ScoreSummary {
            perfect: self.count(Classification::Perfect),
            excellent: self.count(Classification::Excellent),
            good: self.count(Classification::Good),
            basic: self.count(Classification::Basic),
            failed: self.count(Classification::Failed),
            missed: self.missed.len(),
            spurious: self.spurious.len(),
            count_matches: self.count_matches,
            mean_score: self.mean_score(),
        }
    }
}

/// 期待値と認識結果を採点
///
/// 対応付け:
/// 1. シリアル番号の完全一致
/// 2. 残りは編集距離の小さい順（同距離は入力順）、`max_serial_distance` 以内のみ
pub fn score(
    expected: &[BatteryCellRecord],
    actual: &[BatteryCellRecord],
    config: &ScoringConfig,
) -> MatchReport {
    let expected_serials: Vec<String> = expected.iter().map(|e| normalize_code(&e.serial_number)).collect();
    let actual_serials: Vec<String> = actual.iter().map(|a| normalize_code(&a.serial_number)).collect();

    let mut actual_used = vec![false; actual.len()];
    let mut pairing: Vec<Option<(usize, usize)>> = vec![None; expected.len()];

    // 完全一致
    for (ei, e) in expected_serials.iter().enumerate() {
        let found = actual_serials
            .iter()
            .enumerate()
            .find(|(ai, a)| !actual_used[*ai] && *a == e)
            .map(|(ai, _)| ai);
        if let Some(ai) = found {
            actual_used[ai] = true;
            pairing[ei] = Some((ai, 0));
        }
    }

    // 編集距離で近いもの
    let mut candidates: Vec<(usize, usize, usize)> = Vec::new();
    for (ei, e) in expected_serials.iter().enumerate() {
        if pairing[ei].is_some() {
            continue;
        }
        for (ai, a) in actual_serials.iter().enumerate() {
            if actual_used[ai] {
                continue;
            }
            let distance = strsim::levenshtein(e, a);
            if distance <= config.max_serial_distance {
                candidates.push((distance, ei, ai));
            }
        }
    }
    candidates.sort();
    for (distance, ei, ai) in candidates {
        if pairing[ei].is_none() && !actual_used[ai] {
            actual_used[ai] = true;
            pairing[ei] = Some((ai, distance));
        }
    }

    let mut pairs = Vec::new();
    let mut missed = Vec::new();
    for (ei, e) in expected.iter().enumerate() {
        match pairing[ei] {
            Some((ai, distance)) => pairs.push(score_pair(e, &actual[ai], distance, config)),
            None => missed.push(e.clone()),
        }
    }

    let spurious = actual
        .iter()
        .zip(actual_used.iter())
        .filter(|(_, used)| !**used)
        .map(|(a, _)| a.clone())
        .collect();

    MatchReport {
        pairs,
        missed,
        spurious,
        expected_count: expected.len(),
        actual_count: actual.len(),
        count_matches: expected.len() == actual.len(),
    }
}

/// 1組を採点
pub fn score_pair(
    expected: &BatteryCellRecord,
    actual: &BatteryCellRecord,
    serial_distance: usize,
    config: &ScoringConfig,
) -> PairReport {
    let tolerance = config.numeric_tolerance;
    let field_scores = FieldScores {
        serial_number: exact_score(&expected.serial_number, &actual.serial_number),
        model: exact_score(&expected.model, &actual.model),
        energy: numeric_score(expected.energy, actual.energy, tolerance),
        capacity: numeric_score(expected.capacity, actual.capacity, tolerance),
        voltage: numeric_score(expected.voltage, actual.voltage, tolerance),
    };
    let overall_score = field_scores.mean();

    PairReport {
        expected: expected.clone(),
        actual: actual.clone(),
        serial_distance,
        field_scores,
        overall_score,
        classification: classify(overall_score, &config.thresholds),
    }
}

fn exact_score(expected: &str, actual: &str) -> f64 {
    if normalize_code(expected) == normalize_code(actual) {
        1.0
    } else {
        0.0
    }
}

/// 数値項目のスコア
///
/// 完全一致で1.0、相対誤差が `tolerance` に達するまで線形に減少し、以降は0.0。
pub fn numeric_score(expected: f64, actual: f64, tolerance: f64) -> f64 {
    if expected == actual {
        return 1.0;
    }
    if tolerance <= 0.0 || expected == 0.0 {
        return 0.0;
    }
    let relative = (actual - expected).abs() / expected.abs();
    if !relative.is_finite() {
        return 0.0;
    }
    (1.0 - relative / tolerance).clamp(0.0, 1.0)
}

/// 総合スコアを分類
pub fn classify(overall_score: f64, thresholds: &ClassificationThresholds) -> Classification {
    if overall_score >= 1.0 {
        Classification::Perfect
    } else if overall_score >= thresholds.excellent {
        Classification::Excellent
    } else if overall_score >= thresholds.good {
        Classification::Good
    } else if overall_score >= thresholds.basic {
        Classification::Basic
    } else {
        Classification::Failed
    }
}
