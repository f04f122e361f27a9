pub mod pdf;

use std::sync::Arc;
use std::time::Duration;

use crate::error::ExtractionError;

pub use pdf::PdfExtractor;

/// Turns document bytes into plain text.
///
/// Implementations are CPU-bound and synchronous; callers run them through
/// [`extract_isolated`].
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractionError>;
}

/// Runs `extractor` on the blocking pool with a deadline.
///
/// A panic inside the extractor becomes [`ExtractionError::Crashed`]. On
/// timeout the blocking thread is left to finish on its own; its result is
/// discarded.
pub async fn extract_isolated(
    extractor: Arc<dyn TextExtractor>,
    bytes: Arc<Vec<u8>>,
    timeout: Duration,
) -> Result<String, ExtractionError> {
    let task = tokio::task::spawn_blocking(move || extractor.extract(&bytes));

    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(ExtractionError::Timeout(timeout)),
        Ok(Err(join_err)) => Err(ExtractionError::Crashed(panic_message(join_err))),
        Ok(Ok(result)) => result,
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "extractor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl TextExtractor for Fixed {
        fn extract(&self, _bytes: &[u8]) -> Result<String, ExtractionError> {
            Ok(self.0.to_string())
        }
    }

    struct Panics;

    impl TextExtractor for Panics {
        fn extract(&self, _bytes: &[u8]) -> Result<String, ExtractionError> {
            panic!("corrupt xref table");
        }
    }

    struct Sleeps(Duration);

    impl TextExtractor for Sleeps {
        fn extract(&self, _bytes: &[u8]) -> Result<String, ExtractionError> {
            std::thread::sleep(self.0);
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_isolated_success() {
        let text = extract_isolated(
            Arc::new(Fixed("Hello")),
            Arc::new(b"%PDF-1.4".to_vec()),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_panic_becomes_crashed() {
        let err = extract_isolated(Arc::new(Panics), Arc::new(Vec::new()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ExtractionError::Crashed(ref msg) if msg.contains("corrupt xref")),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = extract_isolated(
            Arc::new(Sleeps(Duration::from_millis(500))),
            Arc::new(Vec::new()),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout(_)));
    }
}
