//! プロンプト生成モジュール
//!
//! Vision AIへ送る抽出指示。出力形式は parser::parse_vision_response と対になっている。

/// 抽出対象の項目（例示値付き）
pub const FIELD_EXAMPLES: &[(&str, &str)] = &[
    ("serial_number", "C044160"),
    ("model", "6754E4"),
    ("energy", "36.74 (Wh)"),
    ("capacity", "10.8 (Ah)"),
    ("voltage", "3.40 (V)"),
];

/// 電池セル抽出プロンプト生成
///
/// 写真に写っている全セルを列挙させ、5項目を厳密なJSONで返させる。
pub fn build_battery_prompt() -> String {
    let fields = FIELD_EXAMPLES
        .iter()
        .map(|(name, example)| format!("- {}: e.g. {}", name, example))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a battery quality inspector. The photograph shows one or more battery cells with printed labels.
Enumerate EVERY battery cell visible in the photograph and read these fields from each label:
{fields}

## Output format (strictly this JSON, nothing else)
```json
{{
  "batteries": [
    {{
      "serial_number": "C044160",
      "model": "6754E4",
      "energy": 36.74,
      "capacity": 10.8,
      "voltage": 3.40,
      "confidence": 0.95
    }}
  ],
  "total_batteries_found": 1,
  "notes": "any observations"
}}
```

## Rules
- One entry per physical cell, including partially visible cells whose label is readable
- energy in Wh, capacity in Ah, voltage in V, as plain numbers without units
- If a value cannot be read, use null (never guess, never use 0)
- Mention blur or occlusion in notes
- Output the JSON only"#
    )
}
