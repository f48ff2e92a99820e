//! Bounded buffer of the most recent output lines

use super::MAX_LINE_LEN;
use std::collections::VecDeque;

/// Last `capacity` lines of a process's output
///
/// Chunks may end mid-line; the unfinished line is kept separately and is
/// included by [`lines`](OutputTail::lines) so a prompt without a trailing
/// newline still shows up in diagnostics.
#[derive(Clone, Debug, Default)]
pub struct OutputTail {
    capacity: usize,
    lines: VecDeque<String>,
    partial: String,
}

impl OutputTail {
    /// Create an empty tail keeping at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
            partial: String::new(),
        }
    }

    /// Append a chunk of output
    pub fn push(&mut self, chunk: &str) {
        for ch in chunk.chars() {
            match ch {
                '\n' | '\r' => self.finish_line(),
                _ => {
                    self.partial.push(ch);
                    if self.partial.len() >= MAX_LINE_LEN {
                        self.finish_line();
                    }
                }
            }
        }
    }

    fn finish_line(&mut self) {
        let line = std::mem::take(&mut self.partial);
        let line = line.trim_end();
        if line.is_empty() || self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// Captured lines, oldest first, including an unfinished last line
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.lines.iter().cloned().collect();
        let partial = self.partial.trim_end();
        if !partial.is_empty() && self.capacity > 0 {
            if lines.len() == self.capacity {
                lines.remove(0);
            }
            lines.push(partial.to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_lines() {
        let mut tail = OutputTail::new(3);
        tail.push("a\nb\nc\nd\n");
        assert_eq!(tail.lines(), vec!["b", "c", "d"]);
    }

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut tail = OutputTail::new(5);
        tail.push("Downloa");
        tail.push("ding...10%\r\nnext");
        assert_eq!(tail.lines(), vec!["Downloading...10%", "next"]);
    }

    #[test]
    fn skips_blank_lines() {
        let mut tail = OutputTail::new(5);
        tail.push("\n\n  \nvalue\n\n");
        assert_eq!(tail.lines(), vec!["value"]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut tail = OutputTail::new(0);
        tail.push("line\npartial");
        assert!(tail.lines().is_empty());
    }

    #[test]
    fn overlong_line_is_split() {
        let mut tail = OutputTail::new(5);
        tail.push(&"x".repeat(MAX_LINE_LEN + 3));
        let lines = tail.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE_LEN);
        assert_eq!(lines[1], "xxx");
    }
}
