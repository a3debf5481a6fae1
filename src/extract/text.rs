//! Whitespace normalization and readability metrics

/// Collapses whitespace inside paragraphs and joins paragraphs with a blank line
///
/// Paragraph breaks are blank lines (or single newlines, when the text has no
/// blank lines at all, as JSON-LD bodies often do).
pub fn normalize_text(raw: &str) -> String {
    let has_blank_lines = raw.trim().lines().any(|line| line.trim().is_empty());

    let paragraphs: Vec<String> = if has_blank_lines {
        split_on_blank_lines(raw)
    } else {
        raw.lines().map(str::to_string).collect()
    };

    join_paragraphs(paragraphs.iter().map(String::as_str))
}

/// Joins already-separated paragraphs, collapsing whitespace in each
pub fn join_paragraphs<'a, I>(paragraphs: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    paragraphs
        .into_iter()
        .map(collapse_whitespace)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn split_on_blank_lines(raw: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();

    for line in raw.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(' ');
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}

/// Flesch-Kincaid grade level, clamped at 0 and rounded to one decimal
///
/// Returns 0.0 for text without words.
pub fn complexity_score(text: &str) -> f64 {
    let words: Vec<&str> = text
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphabetic))
        .collect();

    if words.is_empty() {
        return 0.0;
    }

    let sentences = sentence_count(text).max(1) as f64;
    let syllables: usize = words.iter().map(|w| syllable_count(w)).sum();
    let word_total = words.len() as f64;

    let grade = 0.39 * (word_total / sentences) + 11.8 * (syllables as f64 / word_total) - 15.59;
    (grade.max(0.0) * 10.0).round() / 10.0
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count()
}

/// Vowel-group heuristic; silent trailing `e` dropped, at least one per word
fn syllable_count(word: &str) -> usize {
    let word: String = word
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if word.is_empty() {
        return 1;
    }

    let mut count = 0;
    let mut previous_vowel = false;
    for c in word.chars() {
        let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }

    if word.ends_with('e') && !word.ends_with("le") && count > 1 {
        count -= 1;
    }

    count.max(1)
}
