/// Reassembles lines from arbitrarily split output chunks.
///
/// Only complete `\n`-terminated lines are emitted while streaming; whatever is left
/// comes out of [`LineBuffer::finish`] at end of stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    pub fn finish(self) -> Option<String> {
        (!self.pending.is_empty()).then(|| String::from_utf8_lossy(&self.pending).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_chunks_are_joined() {
        let mut buffer = LineBuffer::new();
        let mut out = Vec::new();
        for chunk in ["ab", "c\n", "d"] {
            out.extend(buffer.push(chunk.as_bytes()));
        }
        out.extend(buffer.finish());
        assert_eq!(out, vec!["abc\n".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_one_chunk_many_lines() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"a\nb\n\nc"), vec!["a\n", "b\n", "\n"]);
        assert_eq!(buffer.finish().as_deref(), Some("c"));
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let bytes = "héllo\n".as_bytes();
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&bytes[..2]).is_empty());
        assert_eq!(buffer.push(&bytes[2..]), vec!["héllo\n"]);
        assert_eq!(buffer.finish(), None);
    }
}
