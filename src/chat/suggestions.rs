use once_cell::sync::Lazy;
use regex::Regex;

const MAX_SUGGESTIONS: usize = 3;

static SUGGESTIONS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)\n?\[SUGGESTIONS\]:[ \t]*(.*)$").expect("invalid suggestions regex")
});

/// Assistant content split into what gets displayed and the follow-up prompts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extracted {
    pub content: String,
    pub suggestions: Vec<String>,
}

pub fn extract(content: &str) -> Extracted {
    let Some(caps) = SUGGESTIONS_LINE.captures(content) else {
        return Extracted {
            content: content.to_string(),
            suggestions: Vec::new(),
        };
    };

    let suggestions = caps
        .get(1)
        .map(|m| {
            m.as_str()
                .split('|')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .take(MAX_SUGGESTIONS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Extracted {
        content: SUGGESTIONS_LINE.replace(content, "").trim().to_string(),
        suggestions,
    }
}
