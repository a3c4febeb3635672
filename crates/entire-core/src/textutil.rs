//! Prompt text cleanup for commit message subjects and session labels.

use std::sync::OnceLock;

use regex::Regex;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn ide_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<ide_[^>]*>.*?</ide_[^>]*>").unwrap())
}

fn system_tag_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            "local-command-caveat",
            "system-reminder",
            "command-name",
            "command-message",
            "command-args",
            "local-command-stdout",
        ]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?s)<{tag}[^>]*>.*?</{tag}>")).unwrap())
        .collect()
    })
}

/// Replace whitespace runs (including newlines) with a single space and
/// trim the ends. Prepares multi-line text for single-line display.
pub fn collapse_whitespace(s: &str) -> String {
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Truncate to at most `max_chars` characters, appending `suffix` when
/// truncation happens. Counts chars, not bytes, so multi-byte text is
/// never split.
pub fn truncate_chars(s: &str, max_chars: usize, suffix: &str) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(suffix.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(suffix);
    out
}

/// Remove IDE-injected context tags (`<ide_opened_file>`,
/// `<ide_selection>`) and system-injected tags (`<system-reminder>`,
/// `<command-name>`, …) from prompt text. These must not leak into commit
/// messages or session descriptions.
pub fn strip_ide_tags(text: &str) -> String {
    let mut result = ide_tag_re().replace_all(text, "").to_string();
    for re in system_tag_res() {
        result = re.replace_all(&result, "").to_string();
    }
    result.trim().to_string()
}

/// Default length for a checkpoint commit subject built from a prompt.
pub const SUBJECT_MAX_CHARS: usize = 72;

/// Build a single-line commit subject from raw prompt text.
pub fn commit_subject(prompt: &str) -> String {
    truncate_chars(
        &collapse_whitespace(&strip_ide_tags(prompt)),
        SUBJECT_MAX_CHARS,
        "...",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_flattens_newlines_and_tabs() {
        assert_eq!(collapse_whitespace("  a\n\tb   c \n"), "a b c");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 8, "..."), "héllo...");
        assert_eq!(truncate_chars("short", 10, "..."), "short");
    }

    #[test]
    fn strips_ide_and_system_tags() {
        let text = "<ide_opened_file>src/main.rs</ide_opened_file>fix the bug\
                    <system-reminder>noise</system-reminder>";
        assert_eq!(strip_ide_tags(text), "fix the bug");
    }

    #[test]
    fn strip_handles_multiline_tags() {
        let text = "do it\n<ide_selection>\nfn foo() {}\n</ide_selection>";
        assert_eq!(strip_ide_tags(text), "do it");
    }

    #[test]
    fn subject_from_messy_prompt() {
        let prompt = "<system-reminder>x</system-reminder>  add a\nfunction  foo ";
        assert_eq!(commit_subject(prompt), "add a function foo");
    }

    #[test]
    fn subject_truncates_long_prompts() {
        let prompt = "a".repeat(200);
        let subject = commit_subject(&prompt);
        assert_eq!(subject.chars().count(), SUBJECT_MAX_CHARS);
        assert!(subject.ends_with("..."));
    }
}
