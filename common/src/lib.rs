//! Battery OQC Common Library
//!
//! 認識バックエンドに依存しない型・パーサー・採点ロジック

pub mod types;
pub mod error;
pub mod field_parser;
pub mod parser;
pub mod prompts;
pub mod scorer;
pub mod batch;

pub use types::{
    BackendStatus, BatteryCellRecord, CellField, CellFields, ExtractionFailure, FallbackEvent,
    RecognitionBatch, RecognitionMethod, RecognitionRunResult, RecognitionStatus,
};
pub use error::ResponseError;
pub use field_parser::{parse_cell_text, parse_measurement, parse_number, ParseFailure};
pub use parser::{extract_json, parse_vision_response, VisionResponse};
pub use prompts::build_battery_prompt;
pub use scorer::{score, Classification, MatchReport, PairReport, ScoringConfig};
pub use batch::{aggregate, default_batch_name, SavedBatch};
