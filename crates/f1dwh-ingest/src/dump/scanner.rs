//! Quote-aware splitting of `VALUES` blocks
//!
//! SQL dumps quote text with single quotes and escape embedded quotes either
//! as `\'` or `''`. Parentheses and commas inside a quoted literal never
//! delimit anything.

/// Tracks whether the cursor is inside a single-quoted literal
#[derive(Debug, Default)]
struct QuoteState {
    in_quote: bool,
}

impl QuoteState {
    /// Feed the byte at `i`; returns how many extra bytes were consumed
    fn step(&mut self, bytes: &[u8], i: usize) -> usize {
        let b = bytes[i];
        if !self.in_quote {
            if b == b'\'' {
                self.in_quote = true;
            }
            return 0;
        }

        match b {
            b'\\' => 1,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => 1,
            b'\'' => {
                self.in_quote = false;
                0
            },
            _ => 0,
        }
    }
}

/// Split a `VALUES` block into the inner text of each top-level tuple.
///
/// `('a', 1), ('b (x)', 2)` yields `["'a', 1", "'b (x)', 2"]`. An unterminated
/// trailing tuple is dropped.
pub(crate) fn split_tuples(block: &str) -> Vec<&str> {
    let bytes = block.as_bytes();
    let mut quotes = QuoteState::default();
    let mut tuples = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let was_quoted = quotes.in_quote;
        let skip = quotes.step(bytes, i);

        if !was_quoted {
            match bytes[i] {
                b'(' => {
                    if depth == 0 {
                        start = i + 1;
                    }
                    depth += 1;
                },
                b')' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        tuples.push(&block[start..i]);
                    }
                },
                _ => {},
            }
        }

        i += 1 + skip;
    }

    tuples
}

/// Split the inside of one tuple on commas outside quotes and nested parens
pub(crate) fn split_fields(tuple: &str) -> Vec<&str> {
    let bytes = tuple.as_bytes();
    let mut quotes = QuoteState::default();
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let was_quoted = quotes.in_quote;
        let skip = quotes.step(bytes, i);

        if !was_quoted {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => {
                    fields.push(&tuple[start..i]);
                    start = i + 1;
                },
                _ => {},
            }
        }

        i += 1 + skip;
    }

    fields.push(&tuple[start..]);
    fields
}
