//! J (jconsole)

use crate::config::LanguageId;
use crate::dialect::{Dialect, ErrorStream, Framing, pattern};

pub(super) fn dialect() -> Dialect {
    Dialect {
        id: LanguageId::J,
        ready: None,
        banner: Vec::new(),
        prompt: Some("   "),
        strip_prompt: true,
        echoes_input: false,
        // |domain error, |value error: foo, |out of memory
        errors: vec![pattern(
            r"(?m)^\s*\|(?:[a-z][a-z ]*error\b|out of memory|attention interrupt)",
        )],
        error_stream: ErrorStream::Stdout,
        framing: Framing::Markers,
        print: |marker| format!("echo '{marker}'"),
        wrap: None,
        reset: Some(&["0 0$erase nl ''"]),
        bootstrap: None,
    }
}
