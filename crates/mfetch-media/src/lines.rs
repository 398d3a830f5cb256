//! Incremental line splitting for process output.
//!
//! Extractors rewrite their progress line in place with `\r`, so both `\r`
//! and `\n` terminate a line. Bytes are decoded lossily; a line that never
//! terminates is force-flushed once it reaches [`MAX_LINE_BYTES`].

/// Longest partial line kept in memory before it is emitted as-is.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Splits a byte stream into trimmed, non-empty text lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
            } else {
                self.buf.push(byte);
                if self.buf.len() >= MAX_LINE_BYTES {
                    if let Some(line) = self.take_line() {
                        lines.push(line);
                    }
                }
            }
        }

        lines
    }

    /// Flush the trailing unterminated line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        let text = String::from_utf8_lossy(&raw);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_across_chunks() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.push(b"[download]  1.0%").is_empty());
        assert_eq!(splitter.push(b" of 10MiB\n[down"), vec!["[download]  1.0% of 10MiB"]);
        assert_eq!(splitter.push(b"load] 2.0%\n"), vec!["[download] 2.0%"]);
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_carriage_returns_and_blank_lines() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"a\r\n\r\n   \nb\rc");
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(splitter.finish(), Some("c".to_string()));
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut splitter = LineSplitter::new();
        let lines = splitter.push(b"bad \xff byte\n");
        assert_eq!(lines, vec!["bad \u{fffd} byte"]);
    }

    #[test]
    fn test_oversized_line_is_flushed() {
        let mut splitter = LineSplitter::new();
        let chunk = vec![b'x'; MAX_LINE_BYTES + 10];
        let lines = splitter.push(&chunk);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(splitter.finish().map(|l| l.len()), Some(10));
    }
}
