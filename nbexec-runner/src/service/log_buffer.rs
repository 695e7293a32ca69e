//! Per-job log buffer
//!
//! Bounded, append-only line store owned by one job. Lines carry absolute
//! indices so callers can poll incrementally with a cursor; when capacity
//! is exceeded the oldest lines are dropped but indices are preserved, so
//! a reused cursor never sees gaps or duplicates among retained lines.

use nbexec_core::domain::log::{LogLine, LogStream};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Thread-safe log line store for a single job
pub struct LogBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Absolute index of the first retained line
    start: u64,
    lines: VecDeque<LogLine>,
}

impl LogBuffer {
    /// Creates a buffer retaining at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                start: 0,
                lines: VecDeque::new(),
            }),
        }
    }

    /// Appends one line, evicting the oldest if at capacity
    pub fn push(&self, stream: LogStream, message: String) {
        let mut inner = self.inner.lock().unwrap();
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
            inner.start += 1;
        }
        inner.lines.push_back(LogLine {
            timestamp: chrono::Utc::now(),
            stream,
            message,
        });
    }

    /// Returns retained lines with absolute index >= `since_line`, in
    /// order, together with the cursor for the next poll
    pub fn tail(&self, since_line: u64) -> (Vec<LogLine>, u64) {
        let inner = self.inner.lock().unwrap();
        let skip = since_line.saturating_sub(inner.start) as usize;
        let lines: Vec<LogLine> = inner.lines.iter().skip(skip).cloned().collect();
        let next = inner.start + inner.lines.len() as u64;
        (lines, next)
    }

    /// Total lines ever appended (also the next absolute index)
    pub fn total(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.start + inner.lines.len() as u64
    }

    /// Lines lost to capacity eviction
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().start
    }

    /// Most recent line, if any
    pub fn last_message(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.lines.back().map(|line| line.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_from_zero_returns_everything() {
        let buffer = LogBuffer::new(100);
        buffer.push(LogStream::Stdout, "one".to_string());
        buffer.push(LogStream::Stderr, "two".to_string());

        let (lines, next) = buffer.tail(0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "one");
        assert_eq!(lines[1].message, "two");
        assert_eq!(next, 2);
    }

    #[test]
    fn test_cursor_polling_has_no_gaps_or_duplicates() {
        let buffer = LogBuffer::new(100);
        buffer.push(LogStream::Stdout, "a".to_string());
        buffer.push(LogStream::Stdout, "b".to_string());

        let (first, cursor) = buffer.tail(0);
        assert_eq!(first.len(), 2);

        // Nothing new yet
        let (empty, cursor) = buffer.tail(cursor);
        assert!(empty.is_empty());
        assert_eq!(cursor, 2);

        buffer.push(LogStream::Stdout, "c".to_string());
        let (second, cursor) = buffer.tail(cursor);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message, "c");
        assert_eq!(cursor, 3);
    }

    #[test]
    fn test_capacity_eviction_preserves_absolute_indices() {
        let buffer = LogBuffer::new(3);
        for i in 0..5 {
            buffer.push(LogStream::Stdout, format!("line{}", i));
        }

        assert_eq!(buffer.total(), 5);
        assert_eq!(buffer.dropped(), 2);

        // Lines 0 and 1 were evicted; asking from index 3 still works
        let (lines, next) = buffer.tail(3);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "line3");
        assert_eq!(next, 5);
    }

    #[test]
    fn test_tail_before_evicted_range_starts_at_oldest_retained() {
        let buffer = LogBuffer::new(2);
        for i in 0..4 {
            buffer.push(LogStream::Stdout, format!("line{}", i));
        }

        let (lines, next) = buffer.tail(0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].message, "line2");
        assert_eq!(next, 4);
    }

    #[test]
    fn test_last_message() {
        let buffer = LogBuffer::new(10);
        assert!(buffer.last_message().is_none());
        buffer.push(LogStream::Stdout, "progress: 30%".to_string());
        assert_eq!(buffer.last_message().as_deref(), Some("progress: 30%"));
    }
}
