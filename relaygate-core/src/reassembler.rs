//! Turns arbitrarily fragmented upstream chunks into complete lines.

/// Line terminator of the upstream event stream.
pub const LINE_TERMINATOR: char = '\n';

/// Buffers a partial trailing line between chunks.
///
/// Invariant: the concatenation of every chunk fed so far equals the frames
/// emitted so far, each followed by `\n`, plus [`pending`](Self::pending).
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    pending: String,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line completed by it, terminators removed.
    ///
    /// Empty lines are returned as empty frames; filtering is the decoder's job.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let Some(last) = self.pending.rfind(LINE_TERMINATOR) else {
            return Vec::new();
        };
        let tail = self.pending.split_off(last + LINE_TERMINATOR.len_utf8());
        let complete = std::mem::replace(&mut self.pending, tail);
        complete[..last]
            .split(LINE_TERMINATOR)
            .map(str::to_owned)
            .collect()
    }

    /// The unterminated tail carried into the next `feed`.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Consume the reassembler, returning the unterminated tail if there is one.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending)
        }
    }
}
