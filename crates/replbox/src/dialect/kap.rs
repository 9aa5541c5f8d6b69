//! Kap
//!
//! The Kap REPL reports errors on either stream and has no stable prompt, so
//! replies are delimited by a fixed end token instead of marker pairs.

use crate::config::LanguageId;
use crate::dialect::{Dialect, ErrorStream, Framing, pattern};

pub const END_TOKEN: &str = "__REPLBOX_KAP_DONE__";

pub(super) fn dialect() -> Dialect {
    Dialect {
        id: LanguageId::Kap,
        ready: None,
        banner: vec![pattern(r"(?i)^\s*welcome to kap\b")],
        prompt: None,
        strip_prompt: false,
        echoes_input: false,
        errors: vec![
            pattern(r"(?m)^\s*Error\b"),
            pattern(r"(?m)^\s*Error at:"),
            pattern(r"Exception:"),
        ],
        error_stream: ErrorStream::Both,
        framing: Framing::EndToken(END_TOKEN),
        print: |marker| format!("io:println \"{marker}\""),
        wrap: None,
        // No statement drops user definitions; sessions are replaced instead
        reset: None,
        bootstrap: None,
    }
}
