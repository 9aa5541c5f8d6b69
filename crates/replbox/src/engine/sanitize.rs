//! Reply extraction and output cleanup
//!
//! Turns the raw text an interpreter wrote during a request into the output
//! a user should see: the framed reply only, without prompts, banners,
//! control statements or echoed input.

use crate::dialect::markers::{MarkerSet, is_marker_line};
use crate::dialect::{Dialect, Framing};

/// Cleaned output and whether it carries an error signature
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cleaned {
    pub text: String,
    pub error: bool,
}

/// Cut the reply to the current request out of `text`
///
/// With marker framing, the reply is the lines strictly between the last
/// start-marker line and the first end-marker line after it (or the end of
/// the buffer). With an end token it is everything before the first token
/// line. Returns `None` when the framing line is missing.
pub fn extract_reply(text: &str, framing: Framing, markers: &MarkerSet) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();

    let (from, to) = match framing {
        Framing::Markers => {
            let start = lines
                .iter()
                .rposition(|line| is_marker_line(line, &markers.start))?;
            let end = lines[start + 1..]
                .iter()
                .position(|line| is_marker_line(line, &markers.end))
                .map_or(lines.len(), |offset| start + 1 + offset);
            (start + 1, end)
        }
        Framing::EndToken(token) => {
            let end = lines.iter().position(|line| is_marker_line(line, token))?;
            (0, end)
        }
    };

    Some(lines[from..to].join("\n"))
}

/// Clean an extracted reply
///
/// `submitted` are the lines written for the request; they are used to
/// recognise echoes for dialects that echo input.
pub fn clean(dialect: &Dialect, text: &str, submitted: &[String], markers: &MarkerSet) -> Cleaned {
    let end_token = match dialect.framing {
        Framing::EndToken(token) => Some(token),
        Framing::Markers => None,
    };
    let is_control = |line: &str| {
        markers.contains_any(line) || end_token.is_some_and(|token| line.contains(token))
    };

    // (raw, stripped) pairs
    let mut lines: Vec<(&str, &str)> = text
        .lines()
        .filter(|raw| !dialect.is_echo_of(raw, submitted))
        .map(|raw| (raw, dialect.strip_prompts(raw)))
        .filter(|&(_, line)| !dialect.is_banner_line(line) && !is_control(line))
        .collect();

    // Echoes the prompt filter missed, e.g. after a prompt was merged into
    // the previous output line. Only indented lines are candidates.
    if dialect.echoes_input {
        let mut expected = submitted
            .iter()
            .rev()
            .filter(|line| !is_control(line.as_str()) && !line.trim().is_empty());
        while let Some((raw, line)) = lines.last() {
            let indented = raw.starts_with(char::is_whitespace);
            match expected.next() {
                Some(echo) if indented && line.trim() == echo.trim() => {
                    lines.pop();
                }
                _ => break,
            }
        }
    }

    let start = lines
        .iter()
        .position(|(_, line)| !line.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|(_, line)| !line.trim().is_empty())
        .map_or(start, |i| i + 1);

    let text = lines[start..end]
        .iter()
        .map(|(_, line)| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    let error = dialect.is_error(&text);

    Cleaned { text, error }
}

/// Extract and clean the output of one request from both streams
///
/// Stderr is only considered for dialects that report errors there, and is
/// appended after the stdout reply.
pub fn sanitize(
    dialect: &Dialect,
    markers: &MarkerSet,
    stdout: &str,
    stderr: &str,
    submitted: &[String],
) -> Cleaned {
    let reply = extract_reply(stdout, dialect.framing, markers);
    let reply = reply.as_deref().unwrap_or(stdout);
    let mut cleaned = clean(dialect, reply, submitted, markers);
    if !dialect.error_stream.includes_stdout() {
        cleaned.error = false;
    }

    if dialect.error_stream.includes_stderr() {
        let err = clean(dialect, stderr, submitted, markers);
        if !err.text.is_empty() {
            if !cleaned.text.is_empty() {
                cleaned.text.push('\n');
            }
            cleaned.text.push_str(&err.text);
            cleaned.error |= err.error;
        }
    }

    cleaned
}
