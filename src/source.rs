/// Character reader the lexer pulls from.
///
/// Offsets are character indices, which is also what the diagnostics
/// renderer expects for spans. Supports one character of peek and one
/// character of unget.
#[derive(Debug, Clone)]
pub struct SourceReader {
    chars: Vec<char>,
    pos: usize,
}

impl SourceReader {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    /// Consume and return the next character, `None` at end of input.
    pub fn get(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Step back over the last consumed character.
    pub fn unget(&mut self) {
        debug_assert!(self.pos > 0, "unget at start of input");
        self.pos = self.pos.saturating_sub(1);
    }

    /// Consume the next character only if it equals `expected`.
    pub fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Source text between two character offsets.
    pub fn slice(&self, start: usize, end: usize) -> String {
        let end = end.min(self.chars.len());
        let start = start.min(end);
        self.chars[start..end].iter().collect()
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
