//! Bounded line history for one PTY

use std::collections::VecDeque;

/// Ring of output lines capped at `max`; the oldest lines go first
#[derive(Debug, Clone)]
pub struct Scrollback {
    lines: VecDeque<String>,
    max: usize,
    /// The last line has not seen its newline yet
    open_line: bool,
}

impl Scrollback {
    pub fn new(max: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            max: max.max(1),
            open_line: false,
        }
    }

    /// Append raw output, splitting on newlines
    pub fn push(&mut self, data: &str) {
        if data.is_empty() {
            return;
        }

        let mut pieces = data.split('\n').peekable();
        if let Some(first) = pieces.next() {
            let first = first.strip_suffix('\r').unwrap_or(first);
            match self.lines.back_mut() {
                Some(last) if self.open_line => last.push_str(first),
                _ => self.lines.push_back(first.to_string()),
            }
        }
        for piece in pieces {
            self.lines
                .push_back(piece.strip_suffix('\r').unwrap_or(piece).to_string());
        }

        // A trailing newline leaves an empty, still-open line at the back
        if data.ends_with('\n') {
            if let Some(last) = self.lines.back() {
                if last.is_empty() {
                    self.lines.pop_back();
                }
            }
            self.open_line = false;
        } else {
            self.open_line = true;
        }

        while self.lines.len() > self.max {
            self.lines.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Last `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Tail joined into one string of at most `max_chars` characters
    pub fn tail_text(&self, max_chars: usize) -> String {
        let joined = self.tail(self.lines.len()).join("\n");
        let count = joined.chars().count();
        if count <= max_chars {
            joined
        } else {
            joined.chars().skip(count - max_chars).collect()
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.open_line = false;
    }
}
