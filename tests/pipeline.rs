//! Offline integration tests for the full extraction pipeline.
//!
//! A scripted [`VisionModel`] stands in for the provider, so these run
//! without network access or API keys. Timeouts and retry backoff run on
//! tokio's paused clock.

use async_trait::async_trait;
use calamine::{Data, Reader, Xlsx};
use comptasnap::{
    extract_invoice, extract_sync, extract_to_file, EncodedImage, ErrorKind, ExtractionConfig,
    InvoiceError, InvoiceRecord, ModelCallError, ModelClient, ModelReply, ParseMode, VisionModel,
    UNKNOWN,
};
use edgequake_llm::CompletionOptions;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

const ACME_ANSWER: &str = "Here you go:\n```json\n{\"fournisseur\":\"ACME\",\"date\":\"01/01/2024\",\"HT\":100.0,\"TVA\":18.0,\"TTC\":118.0,\"devise\":\"XOF\"}\n```";

enum Step {
    Reply(&'static str),
    Fail(&'static str),
    Hang,
}

/// Plays back a fixed list of outcomes, one per call.
struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    seen_prompt: Mutex<Option<String>>,
    seen_mime: Mutex<Option<&'static str>>,
}

impl ScriptedModel {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            seen_prompt: Mutex::new(None),
            seen_mime: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    fn label(&self) -> &str {
        "scripted:vision"
    }

    async fn complete(
        &self,
        instruction: &str,
        image: &EncodedImage,
        _options: &CompletionOptions,
    ) -> Result<ModelReply, ModelCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen_prompt.lock().unwrap() = Some(instruction.to_string());
        *self.seen_mime.lock().unwrap() = Some(image.mime_type);

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(ModelReply {
                content: text.to_string(),
                input_tokens: 850,
                output_tokens: 60,
            }),
            Some(Step::Fail(msg)) => Err(msg.into()),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err("unreachable".into())
            }
            None => Err("script exhausted".into()),
        }
    }
}

fn client_for(model: &Arc<ScriptedModel>) -> ModelClient {
    ModelClient::from_model(Arc::clone(model) as Arc<dyn VisionModel>)
}

fn config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .retry_backoff_ms(10)
        .build()
        .unwrap()
}

fn photo(format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([250, 250, 245])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

fn read_rows(bytes: &[u8]) -> (Vec<String>, Vec<Vec<Data>>) {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec())).unwrap();
    let names = workbook.sheet_names();
    let range = workbook.worksheet_range(&names[0]).unwrap();
    (names, range.rows().map(|r| r.to_vec()).collect())
}

fn acme() -> InvoiceRecord {
    InvoiceRecord {
        supplier: "ACME".into(),
        date: "01/01/2024".into(),
        net_amount: 100.0,
        tax_amount: 18.0,
        gross_amount: 118.0,
        currency: "XOF".into(),
    }
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn extracts_record_from_fenced_answer() {
    let model = ScriptedModel::new(vec![Step::Reply(ACME_ANSWER)]);
    let out = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &config())
        .await
        .unwrap();

    assert_eq!(out.record, acme());
    assert_eq!(out.raw_response, ACME_ANSWER);
    assert_eq!(out.stats.model, "scripted:vision");
    assert_eq!(out.stats.input_tokens, 850);
    assert_eq!(out.stats.retries, 0);
    assert_eq!((out.stats.image_width, out.stats.image_height), (64, 48));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn sends_fixed_instruction_and_original_format() {
    let model = ScriptedModel::new(vec![Step::Reply(ACME_ANSWER)]);
    extract_invoice(&photo(ImageFormat::Png), &client_for(&model), &config())
        .await
        .unwrap();

    let prompt = model.seen_prompt.lock().unwrap().clone().unwrap();
    assert_eq!(prompt, comptasnap::prompts::EXTRACTION_PROMPT);
    assert_eq!(*model.seen_mime.lock().unwrap(), Some("image/png"));
}

#[tokio::test]
async fn missing_supplier_still_succeeds() {
    let model = ScriptedModel::new(vec![Step::Reply(
        r#"{"date":"12/02/2024","HT":"8 474,58","TVA":"1 525,42","TTC":"10 000","devise":"xof"}"#,
    )]);
    let out = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &config())
        .await
        .unwrap();

    assert_eq!(out.record.supplier, UNKNOWN);
    assert_eq!(out.record.net_amount, 8474.58);
    assert_eq!(out.record.gross_amount, 10000.0);
    assert_eq!(out.record.currency, "XOF");
    assert!(out.record.totals_consistent());

    let sheet = out.spreadsheet().unwrap();
    assert_eq!(sheet.file_name, "Facture_ComptaSnap.xlsx");
}

// ── Failure kinds ────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_image_never_reaches_the_model() {
    let model = ScriptedModel::new(vec![Step::Reply(ACME_ANSWER)]);
    let err = extract_invoice(b"%PDF-1.7 not a photo", &client_for(&model), &config())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidImage);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn refusal_is_malformed_with_raw_text() {
    let model = ScriptedModel::new(vec![Step::Reply("I cannot read this invoice.")]);
    let err = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &config())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert_eq!(err.raw_response(), Some("I cannot read this invoice."));
}

#[tokio::test]
async fn strict_mode_rejects_prose_wrapped_json() {
    let model = ScriptedModel::new(vec![Step::Reply(ACME_ANSWER)]);
    let config = ExtractionConfig::builder()
        .parse_mode(ParseMode::Strict)
        .build()
        .unwrap();
    let err = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
}

#[tokio::test(start_paused = true)]
async fn one_failure_is_retried_on_the_same_model() {
    let model = ScriptedModel::new(vec![Step::Fail("HTTP 503"), Step::Reply(ACME_ANSWER)]);
    let out = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &config())
        .await
        .unwrap();

    assert_eq!(out.record.supplier, "ACME");
    assert_eq!(out.stats.retries, 1);
    assert_eq!(model.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_is_an_invocation_error() {
    let model = ScriptedModel::new(vec![Step::Fail("HTTP 503"), Step::Fail("HTTP 429")]);
    let err = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &config())
        .await
        .unwrap_err();

    match err {
        InvoiceError::ModelInvocation {
            attempts,
            timed_out,
            detail,
            ..
        } => {
            assert_eq!(attempts, 2);
            assert!(!timed_out);
            assert!(detail.contains("429"));
        }
        other => panic!("expected ModelInvocation, got {other:?}"),
    }
    assert_eq!(model.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn large_retry_settings_do_not_overflow() {
    let model = ScriptedModel::new(vec![]);
    let capped = ExtractionConfig::builder()
        .max_retries(70)
        .retry_backoff_ms(0)
        .build()
        .unwrap();
    let err = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &capped)
        .await
        .unwrap_err();
    assert!(matches!(err, InvoiceError::ModelInvocation { attempts: 6, .. }));
    assert_eq!(model.calls(), 6);

    // Fields set directly skip the builder cap; the backoff still saturates.
    let model = ScriptedModel::new(vec![]);
    let mut raw = config();
    raw.max_retries = 70;
    raw.retry_backoff_ms = u64::MAX;
    let err = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &raw)
        .await
        .unwrap_err();
    assert!(matches!(err, InvoiceError::ModelInvocation { attempts: 71, .. }));
    assert_eq!(model.calls(), 71);
}

#[tokio::test(start_paused = true)]
async fn hanging_model_times_out() {
    let model = ScriptedModel::new(vec![Step::Hang]);
    let config = ExtractionConfig::builder()
        .api_timeout_secs(30)
        .max_retries(0)
        .build()
        .unwrap();
    let err = extract_invoice(&photo(ImageFormat::Jpeg), &client_for(&model), &config)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(matches!(
        err,
        InvoiceError::ModelInvocation { timed_out: true, attempts: 1, .. }
    ));
}

// ── Export ───────────────────────────────────────────────────────────────────

#[test]
fn export_has_header_and_data_rows() {
    let sheet = acme().to_spreadsheet().unwrap();
    let (names, rows) = read_rows(&sheet.bytes);

    assert_eq!(names, vec!["ACME".to_string()]);
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        vec![
            Data::String("fournisseur".into()),
            Data::String("date".into()),
            Data::String("HT".into()),
            Data::String("TVA".into()),
            Data::String("TTC".into()),
            Data::String("devise".into()),
        ]
    );
    assert_eq!(
        rows[1],
        vec![
            Data::String("ACME".into()),
            Data::String("01/01/2024".into()),
            Data::Float(100.0),
            Data::Float(18.0),
            Data::Float(118.0),
            Data::String("XOF".into()),
        ]
    );
}

#[test]
fn export_is_repeatable() {
    let first = read_rows(&acme().to_spreadsheet().unwrap().bytes);
    let second = read_rows(&acme().to_spreadsheet().unwrap().bytes);
    assert_eq!(first, second);
}

#[tokio::test]
async fn extract_to_file_writes_into_directory() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("receipt.jpg");
    std::fs::write(&image_path, photo(ImageFormat::Jpeg)).unwrap();

    let model = ScriptedModel::new(vec![Step::Reply(ACME_ANSWER)]);
    let (out, path) = extract_to_file(
        image_path.to_str().unwrap(),
        dir.path(),
        &client_for(&model),
        &config(),
    )
    .await
    .unwrap();

    assert_eq!(path, dir.path().join("Facture_ACME.xlsx"));
    assert_eq!(out.record, acme());
    let (_, rows) = read_rows(&std::fs::read(&path).unwrap());
    assert_eq!(rows[1][0], Data::String("ACME".into()));
    assert!(!dir.path().join("Facture_ACME.xlsx.tmp").exists());
}

#[tokio::test]
async fn extract_to_file_reports_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![Step::Reply(ACME_ANSWER)]);
    let err = extract_to_file(
        dir.path().join("nope.jpg").to_str().unwrap(),
        dir.path(),
        &client_for(&model),
        &config(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(model.calls(), 0);
}

#[test]
fn sync_wrapper_runs_the_pipeline() {
    let model = ScriptedModel::new(vec![Step::Reply(ACME_ANSWER)]);
    let out = extract_sync(&photo(ImageFormat::Png), &client_for(&model), &config()).unwrap();
    assert_eq!(out.record, acme());
}
