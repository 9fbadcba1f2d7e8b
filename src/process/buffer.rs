// src/process/buffer.rs

/// Bounded text buffer holding the most recent output of one source.
///
/// Capacity is counted in characters, not bytes, and trimming always happens
/// on a character boundary: after every append the buffer holds the last
/// `max_size` characters of everything appended since the last clear.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    content: String,
    chars: usize,
    max_size: usize,
}

impl OutputBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            content: String::new(),
            chars: 0,
            max_size,
        }
    }

    pub fn append(&mut self, chunk: &str) {
        self.content.push_str(chunk);
        self.chars += chunk.chars().count();

        if self.chars > self.max_size {
            let excess = self.chars - self.max_size;
            let cut = self
                .content
                .char_indices()
                .nth(excess)
                .map(|(idx, _)| idx)
                .unwrap_or(self.content.len());
            self.content.drain(..cut);
            self.chars = self.max_size;
        }
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.chars = 0;
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.chars == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
