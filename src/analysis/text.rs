//! OCR-noise tolerant text comparison

/// Characters OCR engines commonly swap, mapped to one canonical form
const CONFUSABLES: [(char, char); 7] = [
    ('0', 'o'),
    ('1', 'l'),
    ('i', 'l'),
    ('|', 'l'),
    ('5', 's'),
    ('8', 'b'),
    ('2', 'z'),
];

fn canonical(c: char) -> char {
    CONFUSABLES
        .iter()
        .find(|(from, _)| *from == c)
        .map_or(c, |(_, to)| *to)
}

/// Lowercase, fold confusable characters, drop punctuation and collapse
/// whitespace. Idempotent.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(canonical)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized edit-distance similarity in [0, 1] after [`normalize_text`].
/// Two empty strings are identical.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    strsim::normalized_levenshtein(&normalize_text(a), &normalize_text(b)) as f32
}
