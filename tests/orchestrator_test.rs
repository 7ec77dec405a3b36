//! オーケストレーターのテスト
//!
//! モックバックエンドでバックエンド選択・フォールバック・キャンセルを検証

use async_trait::async_trait;
use battery_oqc::backend::{BackendExtraction, BackendResult, RecognitionBackend};
use battery_oqc::{BackendFailure, OqcError, OrchestratorOptions, Photograph, RecognitionOrchestrator};
use battery_oqc_common::{BackendStatus, BatteryCellRecord, RecognitionMethod};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
enum Behavior {
    /// 写真1枚につき n セル
    Cells(usize),
    Unavailable,
    Error,
    /// 指定した写真だけエラー、それ以外は n セル
    ErrorFor(&'static str, usize),
    Hang,
}

struct MockBackend {
    method: RecognitionMethod,
    available: bool,
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockBackend {
    fn new(method: RecognitionMethod, available: bool, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            method,
            available,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn cells_for(photo: &Photograph, n: usize) -> BackendExtraction {
    let records = (0..n)
        .map(|i| {
            let mut record = BatteryCellRecord::expected(&format!("C04{:04}", i), "6754E4", 36.72, 10.8, 3.40);
            // 方式はオーケストレーターが上書きする
            record.recognition_method = Some(RecognitionMethod::Unknown);
            record.source_image = photo.file_name.clone();
            record
        })
        .collect();
    BackendExtraction::new(records, Vec::new())
}

#[async_trait]
impl RecognitionBackend for MockBackend {
    fn method(&self) -> RecognitionMethod {
        self.method
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn status(&self) -> BackendStatus {
        BackendStatus {
            service_name: format!("mock-{}", self.method),
            available: self.available,
            configured: self.available,
            description: "mock".into(),
            detail: None,
        }
    }

    async fn extract(&self, photo: &Photograph) -> BackendResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Cells(n) => Ok(cells_for(photo, n)),
            Behavior::Unavailable => Err(BackendFailure::Unavailable("接続不可".into())),
            Behavior::Error => Err(BackendFailure::Error("レート制限".into())),
            Behavior::ErrorFor(name, _) if photo.file_name == name => {
                Err(BackendFailure::Error("レスポンス不正".into()))
            }
            Behavior::ErrorFor(_, n) => Ok(cells_for(photo, n)),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(BackendExtraction::default())
            }
        }
    }
}

fn photos(names: &[&str]) -> Vec<Photograph> {
    names.iter().map(|n| Photograph::new(*n)).collect()
}

fn orchestrator(vision: &Arc<MockBackend>, ocr: &Arc<MockBackend>) -> RecognitionOrchestrator {
    orchestrator_with_timeout(vision, ocr, Duration::from_secs(5))
}

fn orchestrator_with_timeout(
    vision: &Arc<MockBackend>,
    ocr: &Arc<MockBackend>,
    backend_timeout: Duration,
) -> RecognitionOrchestrator {
    RecognitionOrchestrator::new(
        vision.clone(),
        ocr.clone(),
        OrchestratorOptions {
            max_concurrency: 2,
            backend_timeout,
        },
    )
}

// ========================================
// バックエンド選択
// ========================================

#[tokio::test]
async fn test_vision_preferred_when_available() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Cells(4));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(4));

    let run = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg", "P2.jpg"]), &CancellationToken::new())
        .await
        .expect("認識失敗");

    assert_eq!(run.preferred_method, RecognitionMethod::VisionAi);
    assert_eq!(run.total_cells(), 8);
    assert!(run.records.iter().all(|r| r.recognition_method == Some(RecognitionMethod::VisionAi)));
    assert!(run.fallbacks.is_empty());
    assert_eq!(ocr.calls(), 0);
}

#[tokio::test]
async fn test_unavailable_vision_is_never_invoked() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, false, Behavior::Cells(4));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(3));

    let run = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg", "P2.jpg", "P3.jpg"]), &CancellationToken::new())
        .await
        .expect("認識失敗");

    assert_eq!(vision.calls(), 0);
    assert_eq!(ocr.calls(), 3);
    assert_eq!(run.preferred_method, RecognitionMethod::Ocr);
    assert_eq!(run.total_cells(), 9);
    assert!(run.records.iter().all(|r| r.recognition_method == Some(RecognitionMethod::Ocr)));
    // 最初からOCRを選んだ場合はフォールバック扱いにしない
    assert!(run.fallbacks.is_empty());
}

// ========================================
// フォールバック
// ========================================

#[tokio::test]
async fn test_vision_error_falls_back_to_ocr() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Error);
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(2));

    let run = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg", "P2.jpg"]), &CancellationToken::new())
        .await
        .expect("フォールバックで成功するはず");

    assert_eq!(vision.calls(), 2);
    assert_eq!(ocr.calls(), 2);
    assert_eq!(run.preferred_method, RecognitionMethod::VisionAi);
    assert_eq!(run.total_cells(), 4);
    assert!(run.records.iter().all(|r| r.recognition_method == Some(RecognitionMethod::Ocr)));
    assert_eq!(run.fallbacks.len(), 2);
    assert!(run.fallbacks[0].reason.contains("レート制限"));
}

#[tokio::test]
async fn test_vision_unavailable_at_call_time_falls_back() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Unavailable);
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(1));

    let run = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg"]), &CancellationToken::new())
        .await
        .expect("フォールバックで成功するはず");

    assert_eq!(run.records[0].recognition_method, Some(RecognitionMethod::Ocr));
    assert!(run.fell_back());
}

#[tokio::test]
async fn test_partial_fallback_mixes_methods() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::ErrorFor("P2.jpg", 4));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(3));

    let run = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg", "P2.jpg", "P3.jpg"]), &CancellationToken::new())
        .await
        .expect("認識失敗");

    assert_eq!(ocr.calls(), 1);
    assert_eq!(run.total_cells(), 4 + 3 + 4);
    assert_eq!(run.methods_used().len(), 2);

    for record in &run.records {
        let expected = if record.source_image == "P2.jpg" {
            RecognitionMethod::Ocr
        } else {
            RecognitionMethod::VisionAi
        };
        assert_eq!(record.recognition_method, Some(expected), "{}", record.source_image);
        assert!(record.processed_at.is_some());
    }

    assert_eq!(run.fallbacks.len(), 1);
    assert_eq!(run.fallbacks[0].source_image, "P2.jpg");
}

#[tokio::test]
async fn test_timeout_is_treated_as_unavailable() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Hang);
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(2));

    let run = orchestrator_with_timeout(&vision, &ocr, Duration::from_millis(50))
        .process(&photos(&["P1.jpg"]), &CancellationToken::new())
        .await
        .expect("タイムアウト後にOCRで成功するはず");

    assert_eq!(run.total_cells(), 2);
    assert_eq!(run.fallbacks.len(), 1);
    assert!(run.fallbacks[0].reason.contains("利用不可"));
}

// ========================================
// 全滅・空結果
// ========================================

#[tokio::test]
async fn test_both_backends_fail() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Error);
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Error);

    let result = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg"]), &CancellationToken::new())
        .await;

    match result {
        Err(OqcError::NoRecognitionBackendAvailable { source_image, reason }) => {
            assert_eq!(source_image, "P1.jpg");
            assert!(reason.contains("VisionAI"));
            assert!(reason.contains("OCR"));
        }
        other => panic!("NoRecognitionBackendAvailable を期待: {:?}", other),
    }
}

#[tokio::test]
async fn test_ocr_failure_without_vision_is_fatal() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, false, Behavior::Cells(1));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Error);

    let result = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg", "P2.jpg"]), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(OqcError::NoRecognitionBackendAvailable { .. })));
    assert_eq!(vision.calls(), 0);
}

#[tokio::test]
async fn test_nothing_available() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, false, Behavior::Cells(1));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, false, Behavior::Cells(1));
    let orchestrator = orchestrator(&vision, &ocr);

    let result = orchestrator.process(&photos(&["P1.jpg"]), &CancellationToken::new()).await;
    match result {
        Err(OqcError::NoRecognitionBackendAvailable { source_image, .. }) => assert_eq!(source_image, "P1.jpg"),
        other => panic!("NoRecognitionBackendAvailable を期待: {:?}", other.map(|r| r.total_cells())),
    }
    assert_eq!(vision.calls() + ocr.calls(), 0);

    assert_eq!(orchestrator.status().preferred_method, None);
}

#[tokio::test]
async fn test_zero_cells_is_success() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, false, Behavior::Cells(1));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(0));

    let run = orchestrator(&vision, &ocr)
        .process(&photos(&["empty.jpg"]), &CancellationToken::new())
        .await
        .expect("セル0個は成功");

    assert_eq!(run.total_cells(), 0);
    assert_eq!(run.warning_count(), 0);
}

#[tokio::test]
async fn test_no_photos() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Cells(1));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(1));

    let run = orchestrator(&vision, &ocr)
        .process(&[], &CancellationToken::new())
        .await
        .expect("空入力は成功");
    assert_eq!(run.total_cells(), 0);
    assert_eq!(run.preferred_method, RecognitionMethod::VisionAi);
    assert_eq!(vision.calls() + ocr.calls(), 0);
}

#[tokio::test]
async fn test_no_photos_with_nothing_available_fails() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, false, Behavior::Cells(1));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, false, Behavior::Cells(1));

    let result = orchestrator(&vision, &ocr)
        .process(&[], &CancellationToken::new())
        .await;

    match result {
        Err(OqcError::NoRecognitionBackendAvailable { reason, .. }) => {
            assert!(reason.contains("VisionAI"));
            assert!(reason.contains("OCR"));
        }
        other => panic!("NoRecognitionBackendAvailable を期待: {:?}", other.map(|r| r.total_cells())),
    }
}

// ========================================
// キャンセル
// ========================================

#[tokio::test]
async fn test_cancel_before_start() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Cells(4));
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(4));

    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator(&vision, &ocr).process(&photos(&["P1.jpg"]), &cancel).await;
    assert!(matches!(result, Err(OqcError::Cancelled)));
}

#[tokio::test]
async fn test_cancel_in_flight_returns_cancelled() {
    let vision = MockBackend::new(RecognitionMethod::VisionAi, true, Behavior::Hang);
    let ocr = MockBackend::new(RecognitionMethod::Ocr, true, Behavior::Cells(4));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = orchestrator(&vision, &ocr)
        .process(&photos(&["P1.jpg", "P2.jpg"]), &cancel)
        .await;
    assert!(matches!(result, Err(OqcError::Cancelled)), "{:?}", result.map(|r| r.total_cells()));
}
