//! Sentence-aware text chunking with overlap
//!
//! Vector ids are derived from chunk positions, so splitting must be fully
//! deterministic for a given text and parameters.

use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_index: u32,
    /// Byte offset of the chunk text in the source
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Boundaries fall between sentences (paragraph breaks included) where
/// possible; sentences longer than `max_chars` are cut at the last whitespace
/// that fits. Each chunk after the first repeats up to `overlap_chars` of the
/// previous chunk's tail, starting on a word boundary.
pub fn chunk(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    let max_chars = max_chars.max(1);
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len();
    if start >= end {
        return Vec::new();
    }

    if char_len(&text[start..end]) <= max_chars {
        return vec![Chunk {
            chunk_index: 0,
            start_offset: start,
            end_offset: end,
            text: text[start..end].to_string(),
        }];
    }

    let units = split_units(text, start, end, max_chars);
    let mut chunks = Vec::new();
    let mut cur_start = units[0].0;
    let mut cur_end = cur_start;

    for (unit_start, unit_end) in units {
        if cur_end > cur_start && char_len(&text[cur_start..unit_end]) > max_chars {
            push_chunk(&mut chunks, text, cur_start, cur_end);

            let unit_len = char_len(&text[unit_start..unit_end]);
            let budget = overlap_chars.min(max_chars.saturating_sub(unit_len));
            cur_start = overlap_start(text, cur_start, cur_end, budget);
        }
        cur_end = unit_end;
    }
    push_chunk(&mut chunks, text, cur_start, cur_end);

    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Contiguous byte ranges covering `text[start..end]`, each at most `max_chars`
fn split_units(text: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let mut units = Vec::new();

    for (offset, sentence) in text[start..end].split_sentence_bound_indices() {
        let mut pos = start + offset;
        let sentence_end = pos + sentence.len();

        while pos < sentence_end {
            let remaining = &text[pos..sentence_end];
            if char_len(remaining) <= max_chars {
                units.push((pos, sentence_end));
                break;
            }

            let hard_cut = remaining
                .char_indices()
                .nth(max_chars)
                .map(|(idx, _)| idx)
                .unwrap_or(remaining.len());
            let cut = remaining[..hard_cut]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(idx, c)| idx + c.len_utf8())
                .filter(|idx| *idx > 0 && *idx < hard_cut)
                .unwrap_or(hard_cut);

            units.push((pos, pos + cut));
            pos += cut;
        }
    }

    units
}

/// Byte position inside `[lo, hi]` leaving at most `budget` chars before `hi`
fn overlap_start(text: &str, lo: usize, hi: usize, budget: usize) -> usize {
    if budget == 0 {
        return hi;
    }

    let window = &text[lo..hi];
    let total = char_len(window);
    if budget >= total {
        return lo;
    }

    let candidate = lo
        + window
            .char_indices()
            .nth(total - budget)
            .map(|(idx, _)| idx)
            .unwrap_or(0);

    let at_word_start = text[..candidate]
        .chars()
        .next_back()
        .map(char::is_whitespace)
        .unwrap_or(true);
    if at_word_start {
        return candidate;
    }

    // Snap forward past the partial word
    text[candidate..hi]
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map(|(idx, c)| candidate + idx + c.len_utf8())
        .unwrap_or(candidate)
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: &str, start: usize, end: usize) {
    let raw = &text[start..end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }

    let leading = raw.len() - raw.trim_start().len();
    let start_offset = start + leading;
    chunks.push(Chunk {
        chunk_index: chunks.len() as u32,
        start_offset,
        end_offset: start_offset + trimmed.len(),
        text: trimmed.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the source from chunk offsets, dropping the overlapped prefix
    fn deoverlap(source: &str, chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut last_end = 0;
        for (i, c) in chunks.iter().enumerate() {
            let from = if i == 0 {
                c.start_offset
            } else {
                c.start_offset.max(last_end)
            };
            if i > 0 && from > last_end {
                out.push(' ');
            }
            out.push_str(&source[from..c.end_offset]);
            last_end = c.end_offset;
        }
        out
    }

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert!(chunk("", 100, 10).is_empty());
        assert!(chunk("   \n\t  ", 100, 10).is_empty());
    }

    #[test]
    fn test_short_input_single_chunk() {
        let chunks = chunk("  Just a short note.  ", 100, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Just a short note.");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_chunks_respect_max_chars() {
        let text = "First sentence here. Second sentence is a bit longer. \
                    Third one closes the paragraph.\n\nA new paragraph starts. \
                    It keeps going for a while. And then it ends.";
        let chunks = chunk(text, 40, 10);

        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 40, "chunk too long: {:?}", c.text);
            assert_eq!(&text[c.start_offset..c.end_offset], c.text);
        }
        let indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        let expected: Vec<u32> = (0..chunks.len() as u32).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu. \
                    Nu xi omicron pi. Rho sigma tau upsilon.";
        let chunks = chunk(text, 60, 20);

        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset);
            let shared = &text[pair[1].start_offset..pair[0].end_offset];
            assert!(shared.chars().count() <= 20);
            // Overlap starts on a word boundary
            assert!(text[..pair[1].start_offset].ends_with(char::is_whitespace));
        }
    }

    #[test]
    fn test_deoverlapped_concatenation_recovers_text() {
        let text = "Today I walked to the harbour. The boats were painted blue and red, \
                    and the fishermen were mending nets.\n\nLater it rained. I went home, \
                    made tea, and read a long book about lighthouses until midnight.";
        for (max, overlap) in [(25, 0), (40, 8), (60, 20), (500, 50)] {
            let chunks = chunk(text, max, overlap);
            assert_eq!(words(&deoverlap(text, &chunks)), words(text));
        }
    }

    #[test]
    fn test_long_word_is_hard_split() {
        let text = "x".repeat(95);
        let chunks = chunk(&text, 30, 5);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 30));
        assert_eq!(deoverlap(&text, &chunks), text);
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Ünïcödé wörds äre fïne. Ëach sëntence has äccents. Mäny chäracters hëre.";
        let chunks = chunk(text, 24, 6);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 24));
        assert_eq!(words(&deoverlap(text, &chunks)), words(text));
    }

    #[test]
    fn test_deterministic() {
        let text = "One. Two. Three. Four. Five. Six. Seven. Eight. Nine. Ten.";
        assert_eq!(chunk(text, 12, 4), chunk(text, 12, 4));
    }
}
