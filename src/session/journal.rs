//! JSON-lines event journal.
//!
//! Each line is one [`FeatureEvent`]. The journal is tailed: every poll reads
//! the complete lines appended since the previous poll. A trailing line
//! without a newline is left for the next poll.

use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::feature::FeatureEvent;
use crate::session::{EventSource, SessionError, SessionResult};

/// Tails an append-only event journal.
pub struct JournalEvents {
    path: PathBuf,
    offset: u64,
}

impl JournalEvents {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn err(&self, message: String) -> SessionError {
        SessionError::Journal {
            path: self.path.display().to_string(),
            message,
        }
    }
}

impl EventSource for JournalEvents {
    fn poll(&mut self) -> SessionResult<Vec<FeatureEvent>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.err(format!("open: {e}"))),
        };
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(self.offset))
            .map_err(|e| self.err(format!("seek: {e}")))?;

        let mut events = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader
                .read_line(&mut line)
                .map_err(|e| self.err(format!("read: {e}")))?;
            if n == 0 || !line.ends_with('\n') {
                break;
            }
            let line_start = self.offset;
            self.offset += n as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<FeatureEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        offset = line_start,
                        error = %e,
                        "skipping malformed journal line"
                    );
                }
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::feature::EventKind;

    const NEW_MARKER: &str = r#"{"event":"new","feature":{"id":"m1","title":"CP","geometry":{"type":"Point","coordinates":[1.0,2.0]},"class":"Marker","properties":{}}}"#;
    const DELETE_MARKER: &str = r#"{"event":"deleted","feature":{"id":"m1","title":"CP","class":"Marker","properties":{}}}"#;

    #[test]
    fn missing_journal_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut journal = JournalEvents::new(&dir.path().join("events.jsonl"));
        assert!(journal.poll().unwrap().is_empty());
    }

    #[test]
    fn tails_appended_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{NEW_MARKER}").unwrap();

        let mut journal = JournalEvents::new(&path);
        let first = journal.poll().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event, EventKind::New);
        assert!(journal.poll().unwrap().is_empty());

        // Partial line stays pending until its newline arrives.
        write!(file, "{DELETE_MARKER}").unwrap();
        file.flush().unwrap();
        assert!(journal.poll().unwrap().is_empty());
        writeln!(file).unwrap();
        let second = journal.poll().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event, EventKind::Deleted);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        std::fs::write(&path, format!("not json\n{NEW_MARKER}\n")).unwrap();
        let mut journal = JournalEvents::new(&path);
        assert_eq!(journal.poll().unwrap().len(), 1);
    }
}
