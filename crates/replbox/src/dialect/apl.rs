//! Dyalog APL
//!
//! Dyalog echoes each input line after a six-space prompt and prints a
//! licence banner at startup. Untrusted code runs through the `Safe`
//! namespace loaded into the session namespace at boot.

use crate::config::LanguageId;
use crate::dialect::{Dialect, ErrorStream, Framing, pattern};

pub(super) fn dialect() -> Dialect {
    Dialect {
        id: LanguageId::Apl,
        ready: Some(pattern(r"(?im)^\s*clear ws\s*$")),
        banner: vec![
            pattern(r"(?i)^\s*dyalog\b"),
            pattern(r"(?i)serial (?:no|number)"),
            pattern(r"(?i)copyright"),
            pattern(r"(?i)unregistered"),
            pattern(r"(?i)for non-commercial use"),
            pattern(r"(?i)^\s*clear ws\s*$"),
            // +-----+ frames around the licence notice
            pattern(r"^\s*\+[-=+]{3,}\s*$"),
            pattern(r"^\s*\|.*\|\s*$"),
        ],
        prompt: Some("      "),
        strip_prompt: true,
        echoes_input: true,
        errors: vec![
            pattern(r"(?m)^\s*[A-Z][A-Z ]*ERROR\b"),
            pattern(r"(?m)^\s*WS FULL\b"),
            pattern(r"(?m)^\s*INTERRUPT\b"),
        ],
        error_stream: ErrorStream::Stdout,
        framing: Framing::Markers,
        print: |marker| format!("⎕←'{marker}'"),
        wrap: Some(wrap),
        reset: Some(&[")reset", ")clear"]),
        bootstrap: Some(bootstrap),
    }
}

/// Run one line as a quoted string through `⎕SE.Safe.Exec`
fn wrap(line: &str) -> String {
    format!("⎕SE.Safe.Exec '{}'", line.replace('\'', "''"))
}

fn bootstrap(library: &str, timeout_ms: u64) -> Vec<String> {
    let seconds = timeout_ms.div_ceil(1000).max(1);
    vec![
        format!("⎕SE.⎕FIX 'file://{library}'"),
        format!("⎕SE.Safe.Timeout←{seconds}"),
    ]
}
