//! Identifier normalization for entity and statistic ids.
//!
//! The output has to stay byte-for-byte stable: it is the key under which
//! every imported statistic is stored, so changing it orphans history.

/// Converts an arbitrary string into a lowercase `snake_case` identifier.
///
/// 1. every character that is not an ASCII letter or digit becomes a space
/// 2. a space is inserted before each capitalised word (`xWord` -> `x Word`)
/// 3. a space is inserted at each lowercase/digit to uppercase boundary
/// 4. the result is lowercased and each run of spaces becomes one `_`
pub fn to_snake_case(input: &str) -> String {
    let spaced: Vec<char> = input
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let words = split_capitalised_words(&spaced);
    let words = split_case_boundaries(&words);

    let mut out = String::with_capacity(words.len());
    let mut previous_was_space = false;
    for c in words {
        if c == ' ' {
            if !previous_was_space {
                out.push('_');
            }
            previous_was_space = true;
        } else {
            out.push(c.to_ascii_lowercase());
            previous_was_space = false;
        }
    }
    out
}

/// Leftmost, non-overlapping scan for `<any><Upper><lower>+`, inserting a
/// space after `<any>`. The consumed lowercase run is not rescanned.
fn split_capitalised_words(chars: &[char]) -> Vec<char> {
    let mut out = Vec::with_capacity(chars.len() + chars.len() / 2);
    let mut i = 0;
    while i < chars.len() {
        let starts_word = i + 2 < chars.len()
            && chars[i + 1].is_ascii_uppercase()
            && chars[i + 2].is_ascii_lowercase();
        if !starts_word {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let mut end = i + 3;
        while end < chars.len() && chars[end].is_ascii_lowercase() {
            end += 1;
        }
        out.push(chars[i]);
        out.push(' ');
        out.extend_from_slice(&chars[i + 1..end]);
        i = end;
    }
    out
}

fn split_case_boundaries(chars: &[char]) -> Vec<char> {
    let mut out = Vec::with_capacity(chars.len() + chars.len() / 2);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        let is_lower_or_digit = c.is_ascii_lowercase() || c.is_ascii_digit();
        if is_lower_or_digit && chars.get(i + 1).is_some_and(|n| n.is_ascii_uppercase()) {
            out.push(' ');
        }
    }
    out
}
