//! Text normalization shared by the resolver, the classifier and the query
//! structurer. Every length here is counted in `char`s.

/// Modal particles that carry tone but no meaning for matching.
pub const PARTICLES: &[char] = &['的', '了', '吗', '呢', '吧', '啊', '呀', '哦', '嘛'];

const CJK_PUNCTUATION: &[char] = &[
    '，', '。', '！', '？', '、', '；', '：', '“', '”', '‘', '’', '（', '）', '《', '》', '【', '】', '…',
    '—', '·', '～', '「', '」', '『', '』',
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Script {
    Han,
    Alphanumeric,
}

pub fn is_punctuation(character: char) -> bool {
    character.is_ascii_punctuation()
        || CJK_PUNCTUATION.contains(&character)
        || ('\u{3000}'..='\u{303F}').contains(&character)
        || ('\u{2000}'..='\u{206F}').contains(&character)
        || ('\u{FF01}'..='\u{FF0F}').contains(&character)
        || ('\u{FF1A}'..='\u{FF20}').contains(&character)
        || ('\u{FF3B}'..='\u{FF40}').contains(&character)
        || ('\u{FF5B}'..='\u{FF65}').contains(&character)
}

pub fn is_han(character: char) -> bool {
    matches!(
        character,
        '\u{4E00}'..='\u{9FFF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{F900}'..='\u{FAFF}'
            | '\u{20000}'..='\u{2A6DF}'
    )
}

fn is_delimiter(character: char) -> bool {
    character.is_whitespace() || is_punctuation(character) || PARTICLES.contains(&character)
}

fn script_of(character: char) -> Option<Script> {
    if is_han(character) {
        Some(Script::Han)
    } else if character.is_alphanumeric() {
        Some(Script::Alphanumeric)
    } else {
        None
    }
}

/// Case-folds and drops whitespace, punctuation and particles.
pub fn normalize(text: &str) -> String {
    text.chars().filter(|character| !is_delimiter(*character)).flat_map(char::to_lowercase).collect()
}

/// Splits on whitespace, punctuation and particles; tokens are case-folded.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(is_delimiter)
        .filter(|token| !token.is_empty())
        .map(|token| token.chars().flat_map(char::to_lowercase).collect())
        .collect()
}

/// Maximal runs of Han or alphanumeric characters, case-folded.
pub fn script_runs(text: &str) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut current_script = None;

    for character in text.chars() {
        let script = if PARTICLES.contains(&character) { None } else { script_of(character) };
        if script != current_script && !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
        current_script = script;
        if script.is_some() {
            current.extend(character.to_lowercase());
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

pub fn char_ngrams(text: &str, size: usize) -> Vec<String> {
    let characters = text.chars().collect::<Vec<_>>();
    if size == 0 || characters.len() < size {
        return Vec::new();
    }
    characters.windows(size).map(|window| window.iter().collect()).collect()
}

pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Length of the longest common substring.
pub fn lcs_len(left: &str, right: &str) -> usize {
    let left = left.chars().collect::<Vec<_>>();
    let right = right.chars().collect::<Vec<_>>();
    if left.is_empty() || right.is_empty() {
        return 0;
    }

    let mut previous = vec![0usize; right.len() + 1];
    let mut current = vec![0usize; right.len() + 1];
    let mut best = 0;
    for left_char in &left {
        for (index, right_char) in right.iter().enumerate() {
            current[index + 1] = if left_char == right_char { previous[index] + 1 } else { 0 };
            best = best.max(current[index + 1]);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}
