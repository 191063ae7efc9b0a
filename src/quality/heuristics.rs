// src/quality/heuristics.rs
// Rule-based specificity and clarity analysis.
//
// Language-specific vocabulary lives in a (language tag, pattern set)
// table so new languages are additive rows, not edits to the scoring
// logic. Structural signals (numbers, code, file references,
// identifiers) are language-agnostic.

use regex::Regex;
use std::sync::OnceLock;

/// Per-language vocabulary patterns.
pub struct LanguagePatterns {
    pub tag: &'static str,
    /// Domain vocabulary that marks technical content.
    pub technical: Regex,
    /// Vague hedge words that dilute specificity.
    pub hedges: Regex,
    /// Durable preference statements ("user prefers X") - short but
    /// valuable, so the length penalty is softened for them.
    pub preference: Regex,
}

fn language_table() -> &'static [LanguagePatterns] {
    static TABLE: OnceLock<Vec<LanguagePatterns>> = OnceLock::new();
    TABLE.get_or_init(|| {
        vec![
            LanguagePatterns {
                tag: "en",
                technical: Regex::new(
                    r"(?i)\b(function|method|struct|trait|class|module|crate|endpoint|api|database|query|index|cache|thread|async|mutex|lock|transaction|migration|compile|compiler|deploy|test|bug|error|panic|timeout|config|server|client|schema|branch|commit|merge|refactor|regex|token|buffer)\b",
                )
                .expect("en technical pattern"),
                hedges: Regex::new(
                    r"(?i)\b(maybe|perhaps|might|probably|possibly|somehow|something|stuff|things|sort of|kind of|i think|not sure|whatever)\b",
                )
                .expect("en hedges pattern"),
                preference: Regex::new(
                    r"(?i)\b(user|team|we|i) (prefers?|likes?|wants?|avoids?|always|never)\b",
                )
                .expect("en preference pattern"),
            },
            LanguagePatterns {
                tag: "es",
                technical: Regex::new(
                    r"(?i)\b(función|funciones|método|clase|módulo|estructura|consulta|índice|caché|hilo|transacción|migración|compilar|compilador|desplegar|prueba|pruebas|fallo|configuración|servidor|cliente|esquema|rama|confirmación)\b",
                )
                .expect("es technical pattern"),
                hedges: Regex::new(
                    r"(?i)\b(quizás|quizá|tal vez|puede ser|probablemente|posiblemente|algo|cosas|creo que|no estoy segur[oa])\b",
                )
                .expect("es hedges pattern"),
                preference: Regex::new(
                    r"(?i)\b(el usuario|la usuaria|el equipo) (prefiere|quiere|evita|siempre|nunca)\b|\bprefiere\b",
                )
                .expect("es preference pattern"),
            },
        ]
    })
}

/// Language-agnostic structural patterns.
struct StructuralPatterns {
    numerals: Regex,
    fenced_code: Regex,
    file_extension: Regex,
    file_line: Regex,
    identifier: Regex,
    praise_only: Regex,
    list_structure: Regex,
}

fn structural() -> &'static StructuralPatterns {
    static PATTERNS: OnceLock<StructuralPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| StructuralPatterns {
        numerals: Regex::new(r"\d").expect("numerals pattern"),
        fenced_code: Regex::new(r"```").expect("fenced code pattern"),
        file_extension: Regex::new(
            r"(?i)\b[\w/-]+\.(rs|py|ts|tsx|js|jsx|go|java|rb|c|h|cpp|hpp|cs|sql|sh|toml|yaml|yml|json|md|lock)\b",
        )
        .expect("file extension pattern"),
        file_line: Regex::new(r"\b[\w/-]+\.\w+:\d+").expect("file:line pattern"),
        identifier: Regex::new(
            r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b|\b[A-Z][a-z0-9]+(?:[A-Z][a-z0-9]+)+\b",
        )
        .expect("identifier pattern"),
        praise_only: Regex::new(
            r"(?i)^\s*((great|good|nice|awesome|cool|perfect|excellent|thanks|thank you|lgtm|ok|okay|genial|gracias|perfecto)[\s.,!]*)+$",
        )
        .expect("praise pattern"),
        list_structure: Regex::new(r"(?m)^\s*([-*]|\d+\.)\s").expect("list pattern"),
    })
}

/// Minimum word count below which content is penalized as too short.
const MIN_WORDS: usize = 6;

/// Minimum character count below which content is penalized as too short.
const MIN_CHARS: usize = 25;

/// True if any language's preference patterns match.
pub fn is_preference_fact(content: &str) -> bool {
    language_table().iter().any(|l| l.preference.is_match(content))
}

/// Rule-based specificity estimate in [0, 1].
///
/// Starts at 0.5, rewards concrete anchors (numbers, code, file
/// references, identifiers, technical vocabulary), penalizes vagueness
/// and contentless brevity.
pub fn specificity(content: &str) -> f32 {
    let s = structural();
    let trimmed = content.trim();
    let word_count = trimmed.split_whitespace().count();

    let mut score: f32 = 0.5;

    let has_numerals = s.numerals.is_match(trimmed);
    let has_code = s.fenced_code.is_match(trimmed) || trimmed.contains('`');
    let has_file_ext = s.file_extension.is_match(trimmed);
    let has_file_line = s.file_line.is_match(trimmed);

    if has_numerals {
        score += 0.1;
    }
    if has_code {
        score += 0.15;
    }
    if has_file_ext {
        score += 0.1;
    }
    if has_file_line {
        score += 0.1;
    }
    if s.identifier.is_match(trimmed) {
        score += 0.1;
    }
    if language_table().iter().any(|l| l.technical.is_match(trimmed)) {
        score += 0.1;
    }

    let hedge_hits: usize = language_table()
        .iter()
        .map(|l| l.hedges.find_iter(trimmed).count())
        .sum();
    score -= (hedge_hits as f32 * 0.05).min(0.15);

    let preference = is_preference_fact(trimmed);
    if word_count < MIN_WORDS || trimmed.len() < MIN_CHARS {
        // Preference facts are legitimately terse
        score -= if preference { 0.05 } else { 0.2 };
    }
    if s.praise_only.is_match(trimmed) {
        score -= 0.25;
    }
    // Lacks substance: short prose with nothing concrete to anchor on
    if word_count < 10 && !has_numerals && !has_code && !has_file_ext && !has_file_line {
        score -= 0.15;
    }

    score.clamp(0.0, 1.0)
}

/// Rule-based clarity estimate in [0, 1].
///
/// Rewards readable sentence length, structure, and terminal
/// punctuation; penalizes shouting, unbroken runs, and keyboard mash.
pub fn clarity(content: &str) -> f32 {
    let s = structural();
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let mut score: f32 = 0.5;

    let sentences: Vec<&str> = trimmed
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if !sentences.is_empty() {
        let avg_words =
            sentences.iter().map(|p| p.split_whitespace().count()).sum::<usize>() as f32
                / sentences.len() as f32;
        if (5.0..=30.0).contains(&avg_words) {
            score += 0.15;
        }
    }

    if s.list_structure.is_match(trimmed) || trimmed.contains("\n\n") {
        score += 0.15;
    }
    if trimmed.ends_with(['.', '!', '?']) {
        score += 0.05;
    }

    let letters: Vec<char> = trimmed.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 10 {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper as f32 / letters.len() as f32 > 0.5 {
            score -= 0.2;
        }
    }

    if trimmed.split_whitespace().any(|w| w.len() > 40) {
        score -= 0.1;
    }
    if has_repeated_run(trimmed, 6) {
        score -= 0.1;
    }

    score.clamp(0.0, 1.0)
}

/// True if the text contains `min_run` or more identical consecutive
/// characters (whitespace excluded).
fn has_repeated_run(text: &str, min_run: usize) -> bool {
    let mut prev = None;
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            prev = None;
            run = 0;
            continue;
        }
        if Some(c) == prev {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            prev = Some(c);
            run = 1;
        }
    }
    false
}
