use regex::{Regex, RegexSet, RegexSetBuilder};
use std::sync::LazyLock;

/// Output fragments that suggest something went wrong
pub const ERROR_PATTERNS: &[&str] = &[
    r"error[:\s]",
    r"ERR!",
    r"failed",
    r"ENOENT",
    r"EACCES",
    r"permission denied",
    r"command not found",
    r"Cannot find module",
    r"SyntaxError",
    r"TypeError",
    r"ReferenceError",
    r"npm ERR",
    r"fatal:",
    r"FATAL",
    r"panic",
    r"segmentation fault",
    r"core dumped",
    r"exception",
    r"traceback",
    r"ModuleNotFoundError",
    r"ImportError",
];

/// Output that matches an error pattern but is routine
pub const IGNORE_PATTERNS: &[&str] = &[
    r"\d+ passing",
    r"warning:",
    r"deprecated",
    r"npm WARN",
];

/// Words in a user chat message that hint at a problem being discussed
pub const CHAT_ERROR_KEYWORDS: &[&str] = &[
    "error",
    "fail",
    "broken",
    "bug",
    "issue",
    "crash",
    "doesn't work",
    "not working",
    "help",
    "problem",
    "exception",
    "undefined",
    "null",
];

fn case_insensitive_set(patterns: &[&str]) -> RegexSet {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|_| RegexSet::empty())
}

static ERROR_SET: LazyLock<RegexSet> = LazyLock::new(|| case_insensitive_set(ERROR_PATTERNS));
static IGNORE_SET: LazyLock<RegexSet> = LazyLock::new(|| case_insensitive_set(IGNORE_PATTERNS));

// Shell prompt lines: "$ cmd" or "> cmd"
static COMMAND_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^[$>]\s*(.+)$").ok());

/// True if the chunk looks like an error and is not routine noise
pub fn is_error_output(chunk: &str) -> bool {
    ERROR_SET.is_match(chunk) && !IGNORE_SET.is_match(chunk)
}

/// Commands echoed after a prompt marker, in order of appearance
pub fn detect_commands(chunk: &str) -> Vec<String> {
    let Some(re) = COMMAND_LINE.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(chunk)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

pub fn contains_error_keywords(content: &str) -> bool {
    let lower = content.to_lowercase();
    CHAT_ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Slice from the first `{` to the last `}`, if any
pub fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_patterns_match() {
        assert!(is_error_output("ENOENT: no such file or directory\n"));
        assert!(is_error_output("Traceback (most recent call last):"));
        assert!(is_error_output("fatal: not a git repository"));
        assert!(is_error_output("thread 'main' panicked at src/main.rs"));
        assert!(is_error_output("zsh: command not found: carg"));
        assert!(!is_error_output("Compiling foo v0.1.0\n"));
    }

    #[test]
    fn test_ignore_patterns_win() {
        assert!(!is_error_output("12 passing, 0 failed"));
        assert!(!is_error_output("npm WARN deprecated: error handling changed"));
        assert!(!is_error_output("warning: unused variable, build failed earlier"));
    }

    #[test]
    fn test_detect_commands_per_line() {
        let chunk = "$ ls -la\r\ntotal 0\n> npm test\nsome $ inline\n";
        assert_eq!(detect_commands(chunk), vec!["ls -la", "npm test"]);
        assert!(detect_commands("no prompt here").is_empty());
    }

    #[test]
    fn test_chat_keywords() {
        assert!(contains_error_keywords("It DOESN'T WORK after the upgrade"));
        assert!(contains_error_keywords("Got a null pointer"));
        assert!(!contains_error_keywords("Please rename this variable"));
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(
            extract_json("Sure! ```json\n{\"a\": {\"b\": 1}}\n```"),
            Some("{\"a\": {\"b\": 1}}")
        );
        assert_eq!(extract_json("no json"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }
}
