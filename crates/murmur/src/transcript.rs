//! TranscriptAssembler - the growing subtitle buffer.
//!
//! Tokens arrive on a single ordered text channel, so arrival order is
//! generation order and no reorder buffer is needed.

/// Ordered token list plus cumulative text for one session.
#[derive(Debug, Clone, Default)]
pub struct TranscriptAssembler {
    tokens: Vec<String>,
    text: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one token and return the cumulative text.
    pub fn append(&mut self, token: &str) -> &str {
        self.tokens.push(token.to_string());
        self.text.push_str(token);
        &self.text
    }

    /// Clear for a new session.
    pub fn reset(&mut self) {
        self.tokens.clear();
        self.text.clear();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Number of tokens appended.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_arrival_order() {
        let mut t = TranscriptAssembler::new();
        t.append("Hello ");
        assert_eq!(t.append("world"), "Hello world");
        assert_eq!(t.tokens(), &["Hello ".to_string(), "world".to_string()]);
    }

    #[test]
    fn empty_tokens_are_kept() {
        let mut t = TranscriptAssembler::new();
        t.append("");
        t.append("a");
        assert_eq!(t.len(), 2);
        assert_eq!(t.text(), "a");
    }

    #[test]
    fn reset_clears_everything() {
        let mut t = TranscriptAssembler::new();
        t.append("stale");
        t.reset();
        assert!(t.is_empty());
        assert_eq!(t.text(), "");
    }

    #[test]
    fn text_equals_concatenation_for_many_tokens() {
        let tokens: Vec<String> = (0..500).map(|i| format!("t{} ", i)).collect();
        let mut t = TranscriptAssembler::new();
        for tok in &tokens {
            t.append(tok);
        }
        assert_eq!(t.text(), tokens.concat());
        assert_eq!(t.len(), tokens.len());
    }
}
