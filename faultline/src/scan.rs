//! Bounded linear scans over word-addressed memory images.
//!
//! The patcher has to locate several instruction markers in opaque vendor
//! code. The scans are kept as data: a table of [`Pattern`]s is handed to
//! [`locate`], which walks the image once per entry and never reads past it.

/// Where a pattern's scan begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrigin {
    /// Scan from the start of the image.
    Start,
    /// Scan from the previous table entry's match (start if it had none).
    PreviousMatch,
}

/// A word pattern to locate, tagged with a caller-defined role.
#[derive(Debug, Clone, Copy)]
pub struct Pattern<R> {
    /// The exact 32-bit word to look for.
    pub word: u32,
    /// Caller-defined identity of the marker.
    pub role: R,
    /// Where the scan for this pattern starts.
    pub origin: ScanOrigin,
}

/// Offset of the first occurrence of `pattern` in `words`.
pub fn find_word(words: &[u32], pattern: u32) -> Option<usize> {
    find_word_from(words, 0, pattern)
}

/// Offset of the first occurrence of `pattern` in `words`, at or after `from`.
pub fn find_word_from(words: &[u32], from: usize, pattern: u32) -> Option<usize> {
    if from > words.len() {
        return None;
    }
    words[from..].iter().position(|w| *w == pattern).map(|i| from + i)
}

/// Locate every pattern of `table` in `words`.
///
/// Results come back in table order; a pattern that does not occur inside the
/// image yields `None` for its role.
pub fn locate<R: Copy>(words: &[u32], table: &[Pattern<R>]) -> Vec<(R, Option<usize>)> {
    let mut previous = 0;
    let mut results = Vec::with_capacity(table.len());

    for pattern in table {
        let from = match pattern.origin {
            ScanOrigin::Start => 0,
            ScanOrigin::PreviousMatch => previous,
        };
        let found = find_word_from(words, from, pattern.word);
        if let Some(offset) = found {
            tracing::trace!("marker {:#010X} found at word offset {:#X}", pattern.word, offset);
            previous = offset;
        }
        results.push((pattern.role, found));
    }

    results
}
