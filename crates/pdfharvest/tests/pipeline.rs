//! Row processing end to end: fetch, hash, extract, record.

mod common;

use std::sync::Arc;

use common::{pdf_bytes, test_limits, text_pdf, FixedText, Fixture, PanickingExtractor, TestHarness};
use pdfharvest::{
    FailureKind, Outcome, OutcomeTag, PdfExtractor, QueueGateway, QueueSettings, RecordResult,
};
use sha2::{Digest, Sha256};

#[tokio::test]
async fn test_success_row_is_fully_recorded() {
    let harness = TestHarness::new().await;
    let body = pdf_bytes(12345);
    let expected_sha = hex::encode(Sha256::digest(&body));
    harness.server.add("report", Fixture::pdf(body));
    let id = harness
        .insert_row(Some(&harness.server.file_url("report")))
        .await;

    let queue = harness.queue(QueueSettings::default());
    let processor = harness.processor(test_limits(), Arc::new(FixedText("Hello")));

    let rows = queue.claim_batch(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    let outcome = processor.process(&rows[0]).await;
    let Outcome::Success(ref success) = outcome else {
        panic!("expected success, got {:?}", outcome);
    };
    assert_eq!(success.bytes, 12345);
    assert_eq!(success.sha256, expected_sha);

    let recorded = queue.record_outcome(id, &outcome).await.unwrap();
    assert_eq!(recorded, RecordResult::Recorded(OutcomeTag::Success));

    let record = harness.record(id).await;
    assert_eq!(record.processed, Some(true));
    assert_eq!(record.raw_text.as_deref(), Some("Hello"));
    assert_eq!(record.bytes, Some(12345));
    assert_eq!(record.mime.as_deref(), Some("application/pdf"));
    assert_eq!(record.filename.as_deref(), Some("report"));
    assert_eq!(record.sha256.as_deref(), Some(expected_sha.as_str()));
    assert_eq!(record.process_attempts, 1);
    assert_eq!(record.last_error, None);
    assert!(record.processed_at.is_some());
    assert!(record.downloaded_at.is_some());
    assert_eq!(record.claimed_by, None);
}

#[tokio::test]
async fn test_known_digest() {
    let harness = TestHarness::new().await;
    // shorter than the PDF signature, so the declared type decides
    harness.server.add("abc", Fixture::pdf(b"abc".to_vec()));
    let id = harness.insert_row(Some(&harness.server.file_url("abc"))).await;

    let queue = harness.queue(QueueSettings::default());
    let rows = queue.claim_batch(1).await.unwrap();
    let outcome = harness
        .processor(test_limits(), Arc::new(FixedText("abc")))
        .process(&rows[0])
        .await;
    queue.record_outcome(id, &outcome).await.unwrap();

    assert_eq!(
        harness.record(id).await.sha256.as_deref(),
        Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
}

#[tokio::test]
async fn test_real_pdf_text_is_extracted() {
    let harness = TestHarness::new().await;
    harness.server.add(
        "letter",
        Fixture::pdf(text_pdf(&["Hello World", "Second page"]))
            .with_disposition(r#"inline; filename="letter.pdf""#),
    );
    let id = harness
        .insert_row(Some(&harness.server.file_url("letter")))
        .await;

    let queue = harness.queue(QueueSettings::default());
    let rows = queue.claim_batch(1).await.unwrap();
    let outcome = harness
        .processor(test_limits(), Arc::new(PdfExtractor::new()))
        .process(&rows[0])
        .await;
    queue.record_outcome(id, &outcome).await.unwrap();

    let record = harness.record(id).await;
    let text = record.raw_text.unwrap();
    assert!(text.contains("Hello"), "{:?}", text);
    assert!(text.contains("----- PAGE BREAK -----"));
    assert_eq!(record.filename.as_deref(), Some("letter.pdf"));
}

#[tokio::test]
async fn test_existing_downloaded_at_is_kept() {
    let harness = TestHarness::new().await;
    harness.server.add("doc", Fixture::pdf(pdf_bytes(64)));
    harness.insert_row(Some(&harness.server.file_url("doc"))).await;

    let queue = harness.queue(QueueSettings::default());
    let mut rows = queue.claim_batch(1).await.unwrap();
    let earlier = chrono::Utc::now() - chrono::Duration::days(3);
    rows[0].downloaded_at = Some(earlier);

    let outcome = harness
        .processor(test_limits(), Arc::new(FixedText("x")))
        .process(&rows[0])
        .await;
    let Outcome::Success(success) = outcome else {
        panic!("expected success");
    };
    assert_eq!(success.downloaded_at, earlier);
}

#[tokio::test]
async fn test_lying_server_is_permanent_failure() {
    let harness = TestHarness::new().await;
    let mut page = b"<html><head><title>Sign in</title>".to_vec();
    page.resize(2048, b' ');
    harness.server.add("login", Fixture::pdf(page));
    let id = harness.insert_row(Some(&harness.server.file_url("login"))).await;

    let queue = harness.queue(QueueSettings::default());
    let rows = queue.claim_batch(1).await.unwrap();
    let outcome = harness
        .processor(test_limits(), Arc::new(FixedText("never")))
        .process(&rows[0])
        .await;
    assert_eq!(outcome.tag(), OutcomeTag::PermanentFailure);
    assert_eq!(outcome.kind(), Some(FailureKind::UnacceptedMime));

    queue.record_outcome(id, &outcome).await.unwrap();
    let record = harness.record(id).await;
    assert_eq!(record.processed, Some(false));
    assert_eq!(record.process_attempts, 1);
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("UnacceptedMime: "));
    assert_eq!(record.raw_text, None);
}

#[tokio::test]
async fn test_extractor_panic_is_contained() {
    let harness = TestHarness::new().await;
    harness.server.add("doc", Fixture::pdf(pdf_bytes(256)));
    let id = harness.insert_row(Some(&harness.server.file_url("doc"))).await;

    let queue = harness.queue(QueueSettings::default());
    let rows = queue.claim_batch(1).await.unwrap();
    let outcome = harness
        .processor(test_limits(), Arc::new(PanickingExtractor))
        .process(&rows[0])
        .await;

    assert_eq!(outcome.tag(), OutcomeTag::PermanentFailure);
    assert_eq!(outcome.kind(), Some(FailureKind::Extraction));
    assert!(outcome.error_text().unwrap().contains("crashed"));

    queue.record_outcome(id, &outcome).await.unwrap();
    assert_eq!(harness.record(id).await.process_attempts, 1);
}

#[tokio::test]
async fn test_unparseable_pdf_is_extraction_failure() {
    let harness = TestHarness::new().await;
    harness.server.add("junk", Fixture::pdf(pdf_bytes(2000)));
    harness.insert_row(Some(&harness.server.file_url("junk"))).await;

    let queue = harness.queue(QueueSettings::default());
    let rows = queue.claim_batch(1).await.unwrap();
    let outcome = harness
        .processor(test_limits(), Arc::new(PdfExtractor::new()))
        .process(&rows[0])
        .await;

    assert_eq!(outcome.kind(), Some(FailureKind::Extraction));
    assert_eq!(outcome.tag(), OutcomeTag::PermanentFailure);
}

#[tokio::test]
async fn test_server_errors_on_last_attempt_give_up() {
    let harness = TestHarness::new().await;
    harness.insert_row(Some(&harness.server.url("status/503"))).await;

    let queue = harness.queue(QueueSettings::default());
    let mut rows = queue.claim_batch(1).await.unwrap();
    // one attempt left under the default limit of five
    rows[0].process_attempts = 4;

    let outcome = harness
        .processor(test_limits(), Arc::new(FixedText("never")))
        .process(&rows[0])
        .await;

    assert_eq!(outcome.tag(), OutcomeTag::PermanentFailure);
    assert_eq!(outcome.kind(), Some(FailureKind::HttpStatus));
    assert!(outcome
        .error_text()
        .unwrap()
        .starts_with("HttpStatus: giving up after 5 attempts: "));
}
