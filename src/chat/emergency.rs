pub const EMERGENCY_KEYWORDS: &[&str] = &[
    "chest pain",
    "can't breathe",
    "cannot breathe",
    "difficulty breathing",
    "trouble breathing",
    "severe bleeding",
    "unconscious",
    "heart attack",
    "stroke",
    "suicide",
    "suicidal",
    "kill myself",
    "overdose",
];

const SENTINEL: &str = "EMERGENCY:";

/// Case-insensitive substring match against [`EMERGENCY_KEYWORDS`].
pub fn mentions_emergency(text: &str) -> bool {
    let lower = text.to_lowercase();
    EMERGENCY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Whether the reply opens with the `EMERGENCY:` sentinel (leading whitespace ignored).
pub fn reply_flags_emergency(reply: &str) -> bool {
    reply
        .trim_start()
        .get(..SENTINEL.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(SENTINEL))
}

pub fn classify(pre_check: bool, reply: &str) -> bool {
    pre_check || reply_flags_emergency(reply)
}
