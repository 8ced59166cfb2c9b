//! Audit trail of every transition the core makes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use json::object;

/// A journal entry. `timestamp` is seconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub timestamp: f64,
    pub message: String,
}

/// Append-only event log. Implementations swallow their own failures.
pub trait EventSink: Send + Sync {
    fn log(&self, message: String);

    /// Up to `limit` of the latest events, newest first. Sinks that keep no
    /// history return nothing.
    fn recent(&self, _limit: usize) -> Vec<Event> {
        Vec::new()
    }
}

/// Forwards events to the `log` facade.
pub struct LogSink;

impl EventSink for LogSink {
    fn log(&self, message: String) {
        log::info!("{}", message);
    }
}

/// Appends one JSON object per event to a file, mirroring it to `log`.
pub struct JournalSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JournalSink {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<JournalSink> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JournalSink {
            path,
            file: Mutex::new(file),
        })
    }
}

/// Lines that are not journal entries are skipped.
fn parse_line(line: &str) -> Option<Event> {
    let entry = json::parse(line).ok()?;
    Some(Event {
        timestamp: entry["timestamp"].as_f64()?,
        message: entry["event"].as_str()?.to_string(),
    })
}

impl EventSink for JournalSink {
    fn log(&self, message: String) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        let mut line = json::stringify(object! {
            timestamp: timestamp,
            event: message.as_str()
        });
        line.push('\n');
        {
            let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = file.write_all(line.as_bytes()) {
                log::error!("logging event failed: {}", err);
            }
        }
        log::info!("{}", message);
    }

    fn recent(&self, limit: usize) -> Vec<Event> {
        let contents = {
            // Keeps a half-written line out of the read.
            let _file = self.file.lock().unwrap_or_else(|e| e.into_inner());
            match fs::read_to_string(&self.path) {
                Ok(contents) => contents,
                Err(err) => {
                    log::error!("reading journal {}: {}", self.path.display(), err);
                    return Vec::new();
                }
            }
        };
        contents
            .lines()
            .rev()
            .filter_map(parse_line)
            .take(limit)
            .collect()
    }
}
