//! Break point detection for chunking

/// Sentence terminators followed by whitespace; the break falls after the whitespace
const SENTENCE_ENDINGS: &[&str] = &[". ", "! ", "? ", ".\n", "!\n", "?\n", ".\t"];

/// Paragraph separator
const PARAGRAPH_BREAK: &str = "\n\n";

/// Positions where a chunk may end cleanly, sorted and deduplicated.
/// Each position is the byte offset just past a sentence terminator or paragraph break.
pub fn find_break_points(text: &str) -> Vec<usize> {
    let mut points: Vec<usize> = SENTENCE_ENDINGS
        .iter()
        .chain(std::iter::once(&PARAGRAPH_BREAK))
        .flat_map(|pattern| {
            text.match_indices(pattern)
                .map(move |(pos, matched)| pos + matched.len())
        })
        .collect();

    points.sort_unstable();
    points.dedup();
    points
}

/// Latest break point inside `[min_end, max_end]`
pub fn nearest_break_before(break_points: &[usize], min_end: usize, max_end: usize) -> Option<usize> {
    let upto = break_points.partition_point(|&p| p <= max_end);
    break_points[..upto]
        .last()
        .copied()
        .filter(|&p| p >= min_end)
}

/// Largest char boundary at or before `pos`
pub fn floor_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

/// Smallest char boundary at or after `pos`
pub fn ceil_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p < text.len() && !text.is_char_boundary(p) {
        p += 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_break_points() {
        let text = "One. Two! Three?\n\nFour";
        let points = find_break_points(text);

        assert_eq!(points, vec![5, 10, 17, 18]);
        assert_eq!(&text[..5], "One. ");
    }

    #[test]
    fn test_nearest_break_before() {
        let points = vec![10, 30, 55, 80];
        assert_eq!(nearest_break_before(&points, 20, 60), Some(55));
        assert_eq!(nearest_break_before(&points, 60, 79), None);
        assert_eq!(nearest_break_before(&points, 0, 5), None);
    }

    #[test]
    fn test_char_boundaries() {
        let text = "aé b"; // 'é' occupies bytes 1..3
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(ceil_char_boundary(text, 2), 3);
        assert_eq!(floor_char_boundary(text, 99), text.len());
    }
}
