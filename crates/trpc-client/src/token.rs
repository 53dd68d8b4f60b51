use trpc_common::Token;

/// Per-client correlation token generator.
///
/// Tokens are produced by pre-increment, so the first token is `1`. They are
/// never reused and never checked for wraparound: a `u64` does not overflow
/// within the lifetime of one connection.
#[derive(Debug, Clone, Default)]
pub struct TokenGenerator {
    last: Token,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> Token {
        self.last += 1;
        self.last
    }

    /// Most recently issued token, `0` before the first call.
    pub fn last(&self) -> Token {
        self.last
    }
}
