//! Strips conversational code-fence wrapping from generated scripts.

use once_cell::sync::Lazy;
use regex::Regex;

const FENCE: &str = "```";

/// First fenced region. The language tag is only consumed when it sits alone
/// on the opening line, so single-line fences keep their whole body.
static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+.-]*[ \t]*\r?\n)?(.*?)```")
        .expect("fenced block regex is valid")
});

/// Return the executable part of `text`.
///
/// With a complete fence the inner content of the first block is returned.
/// With an unterminated fence every line that starts with a fence marker is
/// dropped instead. The result is always trimmed, and `sanitize` is
/// idempotent.
pub fn sanitize(text: &str) -> String {
    if !text.contains(FENCE) {
        return text.trim().to_string();
    }

    if let Some(inner) = FENCED_BLOCK.captures(text).and_then(|caps| caps.get(1)) {
        return inner.as_str().trim().to_string();
    }

    text.lines()
        .filter(|line| !line.trim_start().starts_with(FENCE))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_python_block() {
        assert_eq!(sanitize("```python\nprint(1)\n```"), "print(1)");
    }

    #[test]
    fn test_extracts_untagged_block_with_prose() {
        let text = "Here is your cube:\n```\nimport Part\nPart.show(Part.makeBox(10, 10, 10))\n```\nEnjoy!";
        assert_eq!(
            sanitize(text),
            "import Part\nPart.show(Part.makeBox(10, 10, 10))"
        );
    }

    #[test]
    fn test_other_language_tags_are_skipped() {
        assert_eq!(sanitize("```py3 \r\nx = 1\r\n```"), "x = 1");
    }

    #[test]
    fn test_single_line_fence_keeps_body() {
        assert_eq!(sanitize("```print(1)```"), "print(1)");
    }

    #[test]
    fn test_only_first_block_is_used() {
        assert_eq!(sanitize("```python\na = 1\n```\ntext\n```python\nb = 2\n```"), "a = 1");
    }

    #[test]
    fn test_unterminated_fence_drops_marker_lines() {
        assert_eq!(sanitize("```python\nx = 1\ny = 2\n"), "x = 1\ny = 2");
    }

    #[test]
    fn test_clean_text_is_only_trimmed() {
        assert_eq!(sanitize("  \nimport FreeCAD\n\n"), "import FreeCAD");
        assert_eq!(sanitize("import FreeCAD"), "import FreeCAD");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "```python\nprint(1)\n```",
            "```\n```",
            "```python\nx = 1",
            "noise ```a``` more ```b```",
            "s = '```'\nprint(s)",
            "   plain   ",
            "",
            "```",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "not idempotent for {sample:?}");
        }
    }
}
