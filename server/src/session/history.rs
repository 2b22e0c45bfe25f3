//! Output history: a bounded in-memory ring for fast "just attached" reads,
//! an on-disk raw transcript for durable byte-range history, and an
//! activity-marker side channel keyed by byte offset (spec §4.5(a)).

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// An activity/lifecycle transition tagged with the raw byte offset it
/// precedes. Emitted in-band as an OSC-133 marker and also recorded here so
/// history replay can align scrollback markers to the correct line.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActivityMarker {
    pub offset: u64,
    pub kind: String,
    pub at_ms: u64,
}

/// Builds the literal `ESC ] 133 ; ts:<kind> ; t=<ms> BEL` escape sequence
/// (spec §4.5(a)'s OSC-133 extension) for a lifecycle marker.
fn osc133_marker(kind: &str, at_ms: u64) -> Vec<u8> {
    format!("\x1b]133;ts:{kind};t={at_ms}\x07").into_bytes()
}

pub struct History {
    transcript_path: PathBuf,
    file: Mutex<File>,
    total_len: AtomicU64,
    ring: Mutex<VecDeque<u8>>,
    ring_cap: usize,
    markers: Mutex<Vec<ActivityMarker>>,
}

impl History {
    pub fn open(transcript_path: &Path, ring_cap: usize) -> anyhow::Result<Self> {
        if let Some(parent) = transcript_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(transcript_path)?;
        let existing_len = file.metadata()?.len();
        Ok(Self {
            transcript_path: transcript_path.to_path_buf(),
            file: Mutex::new(file),
            total_len: AtomicU64::new(existing_len),
            ring: Mutex::new(VecDeque::with_capacity(ring_cap.min(1 << 20))),
            ring_cap,
            markers: Mutex::new(Vec::new()),
        })
    }

    pub fn total_len(&self) -> u64 {
        self.total_len.load(Ordering::Acquire)
    }

    /// Writes the in-band OSC-133 marker bytes into the transcript/ring
    /// (via [`Self::append`]) *before* the output that follows it, and
    /// records the offset they landed at for out-of-band replay alignment.
    /// Returns the marker bytes so the caller can also push them onto the
    /// live output channel (spec §4.5(a)).
    pub fn record_marker(&self, kind: impl Into<String>, at_ms: u64) -> std::io::Result<Vec<u8>> {
        let kind = kind.into();
        let offset = self.total_len();
        let marker_bytes = osc133_marker(&kind, at_ms);
        self.append(&marker_bytes)?;
        self.markers.lock().unwrap().push(ActivityMarker { offset, kind, at_ms });
        Ok(marker_bytes)
    }

    pub fn markers_since(&self, since_offset: u64) -> Vec<ActivityMarker> {
        self.markers
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.offset >= since_offset)
            .cloned()
            .collect()
    }

    pub fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        {
            let mut file = self.file.lock().unwrap();
            file.write_all(bytes)?;
            file.flush()?;
        }
        self.total_len.fetch_add(bytes.len() as u64, Ordering::AcqRel);
        let mut ring = self.ring.lock().unwrap();
        ring.extend(bytes.iter().copied());
        while ring.len() > self.ring_cap {
            ring.pop_front();
        }
        Ok(())
    }

    /// Returns bytes in `[start, end)`. `end = None` means "to the current
    /// end of the transcript". Reads from disk so the result is correct
    /// even for offsets that have since been evicted from the ring.
    pub fn read_range(&self, start: u64, end: Option<u64>) -> std::io::Result<Vec<u8>> {
        let total = self.total_len();
        let end = end.unwrap_or(total).min(total);
        if start >= end {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.transcript_path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Bytes since `since_offset`, the cheap-resume path clients use.
    pub fn read_since(&self, since_offset: u64) -> std::io::Result<Vec<u8>> {
        self.read_range(since_offset, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_range_round_trips() {
        let dir = std::env::temp_dir().join(format!("termhub-history-test-{}", std::process::id()));
        let path = dir.join("transcript.raw");
        let history = History::open(&path, 1024).unwrap();
        history.append(b"hello ").unwrap();
        history.append(b"world").unwrap();
        assert_eq!(history.total_len(), 11);
        let all = history.read_range(0, None).unwrap();
        assert_eq!(all, b"hello world");
        let since = history.read_since(6).unwrap();
        assert_eq!(since, b"world");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn markers_precede_their_offset() {
        let dir = std::env::temp_dir().join(format!("termhub-history-test-{}", "markers"));
        let path = dir.join("transcript.raw");
        let history = History::open(&path, 1024).unwrap();
        let marker_bytes = history.record_marker("start", 1000).unwrap();
        history.append(b"abc").unwrap();
        let markers = history.markers_since(0);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].offset, 0);
        assert_eq!(markers[0].kind, "start");

        let all = history.read_range(0, None).unwrap();
        assert_eq!(&all[..marker_bytes.len()], &marker_bytes[..]);
        assert_eq!(&all[marker_bytes.len()..], b"abc");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn marker_bytes_carry_the_osc_133_escape_sequence() {
        let dir = std::env::temp_dir().join(format!("termhub-history-test-{}", "osc133"));
        let path = dir.join("transcript.raw");
        let history = History::open(&path, 1024).unwrap();
        let marker_bytes = history.record_marker("input submit", 42).unwrap();
        assert_eq!(marker_bytes, b"\x1b]133;ts:input submit;t=42\x07");
        std::fs::remove_dir_all(&dir).ok();
    }
}
