//! Character-window text chunker for long documents.
//!
//! Splits extracted page text into fixed-size overlapping windows while
//! tracking the page span each window was cut from. Boundaries are a
//! pure function of `(chunk_size, overlap, input)`, so re-indexing the
//! same document always produces identical chunks and ordinals.
//!
//! Windows are measured in characters, never bytes, so multi-byte
//! scripts (Arabic, Kurdish) are never split mid-character.

/// Text extracted from one page of a document.
#[derive(Debug, Clone)]
pub struct PageText {
    /// 1-based page number.
    pub page: usize,
    pub text: String,
}

/// One window of document text with its ordinal and page span.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Zero-based, contiguous over emitted chunks.
    pub ordinal: i64,
    pub text: String,
    pub page_start: usize,
    pub page_end: usize,
}

/// Split page texts into overlapping character windows.
///
/// Every chunk has length in `(0, chunk_size]`; only the final chunk of
/// a document may be shorter than `chunk_size - overlap`. Whitespace-only
/// windows are dropped without consuming an ordinal.
pub fn chunk_pages(pages: &[PageText], chunk_size: usize, overlap: usize) -> Vec<TextChunk> {
    assert!(chunk_size > 0, "chunk_size must be > 0");
    assert!(overlap < chunk_size, "overlap must be < chunk_size");

    // Flatten pages into one char sequence, remembering which page each
    // char came from.
    let mut chars: Vec<char> = Vec::new();
    let mut page_of: Vec<usize> = Vec::new();

    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            chars.push('\n');
            page_of.push(page.page);
        }
        for c in page.text.chars() {
            chars.push(c);
            page_of.push(page.page);
        }
    }

    let total = chars.len();
    let mut chunks = Vec::new();
    let mut ordinal: i64 = 0;
    let mut start = 0usize;
    let step = chunk_size - overlap;

    while start < total {
        let end = (start + chunk_size).min(total);
        let window: String = chars[start..end].iter().collect();

        if !window.trim().is_empty() {
            chunks.push(TextChunk {
                ordinal,
                text: window,
                page_start: page_of[start],
                page_end: page_of[end - 1],
            });
            ordinal += 1;
        }

        if end == total {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize, text: &str) -> PageText {
        PageText {
            page: n,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_pages(&[page(1, "Hello, world!")], 1000, 150);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].page_start, 1);
        assert_eq!(chunks[0].page_end, 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_pages(&[], 1000, 150).is_empty());
        assert!(chunk_pages(&[page(1, "   \n  ")], 1000, 150).is_empty());
    }

    #[test]
    fn test_windows_overlap() {
        let text: String = ('a'..='z').cycle().take(100).collect();
        let chunks = chunk_pages(&[page(1, &text)], 40, 10);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().rev().take(10).collect::<Vec<_>>().iter().rev().collect();
            let head: String = pair[1].text.chars().take(10).collect();
            assert_eq!(tail, head, "overlap region must repeat");
        }
    }

    #[test]
    fn test_final_chunk_may_be_shorter() {
        let text = "x".repeat(95);
        let chunks = chunk_pages(&[page(1, &text)], 40, 10);
        let last = chunks.last().unwrap();
        assert!(last.text.chars().count() <= 40);
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.text.chars().count(), 40);
        }
    }

    #[test]
    fn test_ordinals_contiguous() {
        let text = "word ".repeat(200);
        let chunks = chunk_pages(&[page(1, &text)], 50, 10);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as i64);
        }
    }

    #[test]
    fn test_deterministic() {
        let pages = [page(1, &"alpha beta ".repeat(30)), page(2, &"gamma delta ".repeat(30))];
        let a = chunk_pages(&pages, 100, 20);
        let b = chunk_pages(&pages, 100, 20);
        assert_eq!(a, b);
    }

    #[test]
    fn test_page_spans_cross_boundaries() {
        let pages = [page(1, &"a".repeat(60)), page(2, &"b".repeat(60))];
        let chunks = chunk_pages(&pages, 80, 10);
        assert!(chunks[0].page_start == 1);
        // Some chunk must straddle the page boundary
        assert!(chunks.iter().any(|c| c.page_start == 1 && c.page_end == 2));
        assert_eq!(chunks.last().unwrap().page_end, 2);
    }

    #[test]
    fn test_multibyte_never_split() {
        let text = "مرحبا بكم في دعم العملاء ".repeat(20);
        let chunks = chunk_pages(&[page(1, &text)], 37, 9);
        // Reconstructing each chunk through chars proves no char was torn;
        // also verify the window length bound in chars.
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 37);
        }
    }
}
