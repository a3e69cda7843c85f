// OutputManager exit codes and writer failures, seen from outside the crate.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use civicsim::io::{ExitCode, OutputFormat, OutputManager};
use civicsim::{Collection, EngineError, OwnerId, RecordSummary, SearchResult, Score};

/// A writer that always returns broken pipe error
struct BrokenPipeWriter;

impl Write for BrokenPipeWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken"))
    }
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn result(id: u64, title: &str) -> SearchResult {
    SearchResult {
        owner_id: OwnerId::new(id),
        collection: Collection::Issue,
        similarity: Score::clamped(0.9),
        record: RecordSummary::new(OwnerId::new(id), title, ""),
    }
}

#[test]
fn verify_exit_codes_are_unix_compliant() {
    let codes = [
        (ExitCode::Success, 0),
        (ExitCode::GeneralError, 1),
        (ExitCode::BlockingError, 2),
        (ExitCode::NotFound, 3),
        (ExitCode::InvalidArgument, 4),
        (ExitCode::EmbeddingUnavailable, 5),
        (ExitCode::ConfigError, 6),
        (ExitCode::StorageError, 7),
        (ExitCode::Cancelled, 8),
    ];

    for (code, expected) in codes {
        let value = i32::from(code);
        assert_eq!(value, expected, "Exit code value mismatch for {code:?}");
        assert!(
            value <= 125,
            "Exit code {value} is in reserved range (126-255)"
        );
    }
}

#[test]
fn test_collection_exit_codes() {
    let stdout = Captured::default();
    let stderr = Captured::default();
    let mut manager = OutputManager::new_with_writers(
        OutputFormat::Text,
        Box::new(stdout.clone()),
        Box::new(stderr.clone()),
    );

    let code = manager
        .collection(vec![result(1, "Pothole"), result(2, "Crater")], "results", "'pothole'")
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert!(stdout.text().contains("Found 2 results"));
    assert!(stdout.text().contains("Crater"));

    let code = manager
        .collection(Vec::<SearchResult>::new(), "results", "'nothing'")
        .unwrap();
    assert_eq!(code, ExitCode::NotFound);
    assert!(stderr.text().contains("No results found for 'nothing'"));
}

#[test]
fn test_json_error_goes_to_stderr() {
    let stdout = Captured::default();
    let stderr = Captured::default();
    let mut manager = OutputManager::new_with_writers(
        OutputFormat::Json,
        Box::new(stdout.clone()),
        Box::new(stderr.clone()),
    );

    let code = manager
        .error(&EngineError::Cancelled {
            operation: "cluster",
        })
        .unwrap();
    assert_eq!(code, ExitCode::Cancelled);
    assert!(stdout.text().is_empty());

    let json: serde_json::Value = serde_json::from_str(&stderr.text()).unwrap();
    assert_eq!(json["status"], "error");
    assert_eq!(json["exit_code"], 8);
}

#[test]
fn test_broken_pipe_surfaces_as_io_error() {
    let mut manager = OutputManager::new_with_writers(
        OutputFormat::Json,
        Box::new(BrokenPipeWriter),
        Box::new(Vec::new()),
    );

    let err = manager
        .collection(vec![result(1, "Pothole")], "results", "'pothole'")
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
}
