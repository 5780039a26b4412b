//! Response grammars shared by the vendor adapters.
//!
//! Two grammars exist. The structured one uses labelled lines:
//!
//! ```text
//! COMMAND: find . -name '*.log'
//! EXPLANATION: lists log files below the current directory
//! DANGER_LEVEL: safe
//! DANGER_REASON: read-only
//! ```
//!
//! The inline one is a single line, `command || explanation` when an
//! explanation was requested, otherwise just the command. Both tolerate
//! markdown code fences around the answer.

use crate::danger::DangerLevel;

/// Fields extracted from model text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCommand {
    pub command: String,
    pub explanation: Option<String>,
    pub danger_level: Option<DangerLevel>,
    pub danger_reason: Option<String>,
}

/// Normalised finish/stop indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Recitation,
    Other,
}

/// Confidence implied by how generation ended.
pub fn confidence_for(reason: FinishReason) -> f64 {
    match reason {
        FinishReason::Stop => 0.9,
        FinishReason::Length => 0.7,
        FinishReason::ContentFilter => 0.3,
        FinishReason::Recitation => 0.4,
        FinishReason::Other => 0.5,
    }
}

/// Removes surrounding code fences (with or without a language tag) and whitespace.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        // Only a single `...` pair wrapping the whole text is markup.
        if let Some(inner) = trimmed
            .strip_prefix('`')
            .and_then(|rest| rest.strip_suffix('`'))
            .filter(|inner| !inner.contains('`'))
        {
            return inner.trim().to_string();
        }
        return trimmed.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().collect();
    // Opening fence, possibly with a language tag.
    let opening = lines.remove(0);
    let inline_rest = opening.trim_start_matches('`');
    if lines.is_empty() {
        // ```ls -la``` on one line
        return inline_rest.trim_end_matches('`').trim().to_string();
    }
    if lines.last().is_some_and(|l| l.trim().starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// Parses the labelled-line grammar.
///
/// Unlabelled lines continue the previous field. Without a `COMMAND:` label
/// the first non-empty line is taken as the command.
pub fn parse_structured(text: &str) -> ParsedCommand {
    #[derive(Clone, Copy)]
    enum Field {
        Command,
        Explanation,
        Reason,
        None,
    }

    let body = strip_code_fences(text);
    let mut parsed = ParsedCommand::default();
    let mut command_lines: Vec<String> = Vec::new();
    let mut explanation_lines: Vec<String> = Vec::new();
    let mut reason_lines: Vec<String> = Vec::new();
    let mut current = Field::None;
    let mut saw_label = false;

    for raw in body.lines() {
        let line = raw.trim();
        if let Some(rest) = strip_label(line, "COMMAND") {
            saw_label = true;
            current = Field::Command;
            command_lines.push(strip_code_fences(rest));
        } else if let Some(rest) = strip_label(line, "EXPLANATION") {
            saw_label = true;
            current = Field::Explanation;
            explanation_lines.push(rest.to_string());
        } else if let Some(rest) = strip_label(line, "DANGER_LEVEL") {
            saw_label = true;
            current = Field::None;
            parsed.danger_level = rest.parse::<DangerLevel>().ok();
        } else if let Some(rest) = strip_label(line, "DANGER_REASON") {
            saw_label = true;
            current = Field::Reason;
            reason_lines.push(rest.to_string());
        } else if line.is_empty() {
            // A blank line closes the command; prose may follow it.
            if matches!(current, Field::Command) {
                current = Field::None;
            }
        } else if !line.starts_with("```") {
            match current {
                Field::Command => {
                    if command_lines.last().is_some_and(|l| l.trim_end().ends_with('\\')) {
                        command_lines.push(line.to_string());
                    } else {
                        current = Field::None;
                    }
                }
                Field::Explanation => explanation_lines.push(line.to_string()),
                Field::Reason => reason_lines.push(line.to_string()),
                Field::None => {}
            }
        }
    }

    if !saw_label {
        parsed.command = body
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
        return parsed;
    }

    parsed.command = command_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    parsed.explanation = join_non_empty(&explanation_lines, " ");
    parsed.danger_reason = join_non_empty(&reason_lines, " ");
    parsed
}

/// Parses the `command || explanation` grammar.
///
/// The split happens at the last ` || ` so shell `||` chains inside the
/// command survive. Without a requested explanation the whole line is the
/// command.
pub fn parse_inline(text: &str, explanation_requested: bool) -> ParsedCommand {
    let body = strip_code_fences(text);
    let line = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if explanation_requested {
        if let Some((command, explanation)) = line.rsplit_once(" || ") {
            let explanation = explanation.trim();
            return ParsedCommand {
                command: strip_code_fences(command),
                explanation: (!explanation.is_empty()).then(|| explanation.to_string()),
                ..ParsedCommand::default()
            };
        }
    }

    ParsedCommand {
        command: strip_code_fences(&line),
        ..ParsedCommand::default()
    }
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = line[label.len()..].trim_start();
    rest.strip_prefix(':').map(str::trim)
}

fn join_non_empty(lines: &[String], sep: &str) -> Option<String> {
    let joined = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(sep);
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_fields() {
        let parsed = parse_structured("COMMAND:x\nEXPLANATION:y\nDANGER_LEVEL:high\nDANGER_REASON:z\n");
        assert_eq!(parsed.command, "x");
        assert_eq!(parsed.explanation.as_deref(), Some("y"));
        assert_eq!(parsed.danger_level, Some(DangerLevel::High));
        assert_eq!(parsed.danger_reason.as_deref(), Some("z"));
    }

    #[test]
    fn test_structured_with_spaces_and_no_explanation() {
        let text = "COMMAND: grep -rl \"hello\" --include=\"*.txt\" .\nDANGER_LEVEL: safe\nDANGER_REASON: read-only search\n";
        let parsed = parse_structured(text);
        assert_eq!(parsed.command, r#"grep -rl "hello" --include="*.txt" ."#);
        assert_eq!(parsed.explanation, None);
        assert_eq!(parsed.danger_level, Some(DangerLevel::Safe));
        assert_eq!(parsed.danger_reason.as_deref(), Some("read-only search"));
    }

    #[test]
    fn test_structured_multiline_explanation_and_fenced_command() {
        let text = "```\nCOMMAND: `ls -la`\nEXPLANATION: lists files\nincluding hidden ones\nDANGER_LEVEL: SAFE\n```";
        let parsed = parse_structured(text);
        assert_eq!(parsed.command, "ls -la");
        assert_eq!(parsed.explanation.as_deref(), Some("lists files including hidden ones"));
        assert_eq!(parsed.danger_level, Some(DangerLevel::Safe));
    }

    #[test]
    fn test_structured_without_labels_uses_first_line() {
        let parsed = parse_structured("\n  df -h\nsome chatter");
        assert_eq!(parsed.command, "df -h");
        assert_eq!(parsed.danger_level, None);
    }

    #[test]
    fn test_structured_unknown_level_is_dropped() {
        let parsed = parse_structured("COMMAND: ls\nDANGER_LEVEL: spicy");
        assert_eq!(parsed.danger_level, None);
    }

    #[test]
    fn test_inline_with_explanation() {
        let parsed = parse_inline("cmd || note", true);
        assert_eq!(parsed.command, "cmd");
        assert_eq!(parsed.explanation.as_deref(), Some("note"));
    }

    #[test]
    fn test_inline_keeps_shell_or_chains() {
        let parsed = parse_inline("test -f a || touch a || creates a if missing", true);
        assert_eq!(parsed.command, "test -f a || touch a");
        assert_eq!(parsed.explanation.as_deref(), Some("creates a if missing"));

        let parsed = parse_inline("test -f a || touch a", false);
        assert_eq!(parsed.command, "test -f a || touch a");
        assert_eq!(parsed.explanation, None);
    }

    #[test]
    fn test_inline_without_separator() {
        let parsed = parse_inline("ls -la", true);
        assert_eq!(parsed.command, "ls -la");
        assert_eq!(parsed.explanation, None);
    }

    #[test]
    fn test_code_fence_stripping() {
        assert_eq!(strip_code_fences("```bash\nls\n```"), "ls");
        assert_eq!(strip_code_fences("```\nls -la\n```"), "ls -la");
        assert_eq!(strip_code_fences("```ls```"), "ls");
        assert_eq!(strip_code_fences("`pwd`"), "pwd");
        assert_eq!(strip_code_fences("  whoami \n"), "whoami");
        assert_eq!(parse_inline("```sh\ndu -sh .\n```", false).command, "du -sh .");
    }

    #[test]
    fn test_trailing_backtick_of_command_substitution_survives() {
        assert_eq!(parse_inline("kill `pgrep myapp`", false).command, "kill `pgrep myapp`");
        assert_eq!(strip_code_fences("echo `date` `whoami`"), "echo `date` `whoami`");
        assert_eq!(
            parse_structured("COMMAND: kill `pgrep myapp`\nDANGER_LEVEL: medium").command,
            "kill `pgrep myapp`"
        );
    }

    #[test]
    fn test_structured_prose_after_command_is_not_part_of_it() {
        let parsed = parse_structured(
            "COMMAND: ls -la\n\nThis lists all files, including hidden ones.\nDANGER_LEVEL: safe\n",
        );
        assert_eq!(parsed.command, "ls -la");
        assert_eq!(parsed.danger_level, Some(DangerLevel::Safe));

        let parsed = parse_structured("COMMAND: ls -la\nThis lists all files.\nDANGER_LEVEL: safe");
        assert_eq!(parsed.command, "ls -la");
    }

    #[test]
    fn test_structured_backslash_continuation_is_kept() {
        let parsed = parse_structured("COMMAND: docker run \\\n  -it ubuntu\nDANGER_LEVEL: low");
        assert_eq!(parsed.command, "docker run \\\n-it ubuntu");
        assert_eq!(parsed.danger_level, Some(DangerLevel::Low));
    }

    #[test]
    fn test_confidence_table() {
        assert_eq!(confidence_for(FinishReason::Stop), 0.9);
        assert_eq!(confidence_for(FinishReason::Length), 0.7);
        assert_eq!(confidence_for(FinishReason::ContentFilter), 0.3);
        assert_eq!(confidence_for(FinishReason::Recitation), 0.4);
        assert_eq!(confidence_for(FinishReason::Other), 0.5);
    }
}
