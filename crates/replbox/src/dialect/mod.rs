//! Per-interpreter dialect descriptors
//!
//! A dialect captures everything that differs between the REPLs the engine
//! drives: how to print a marker, what the prompt and banner look like,
//! whether input is echoed back, how errors are reported and how session
//! state is cleared between requests.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::LanguageId;
use crate::dialect::markers::MarkerSet;

mod apl;
mod j;
mod kap;
pub mod markers;

/// Where an interpreter reports errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStream {
    Stdout,
    Stderr,
    Both,
}

impl ErrorStream {
    pub fn includes_stdout(self) -> bool {
        matches!(self, ErrorStream::Stdout | ErrorStream::Both)
    }

    pub fn includes_stderr(self) -> bool {
        matches!(self, ErrorStream::Stderr | ErrorStream::Both)
    }
}

/// How a reply is delimited in the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Random start and end markers printed around the request
    Markers,
    /// A fixed token printed after the request
    EndToken(&'static str),
}

/// Text written to the interpreter for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Everything, newline terminated, written in a single write
    pub text: String,
    /// The individual submitted lines, used to recognise echoes
    pub lines: Vec<String>,
}

impl Payload {
    fn from_lines(lines: Vec<String>) -> Self {
        let mut text = lines.join("\n");
        text.push('\n');
        Self { text, lines }
    }
}

#[derive(Debug, Clone)]
pub struct Dialect {
    pub id: LanguageId,

    /// Output that shows the interpreter finished booting
    pub ready: Option<Regex>,

    /// Startup banner and noise lines, dropped from every reply
    pub banner: Vec<Regex>,

    /// Input prompt written before each line is read
    pub prompt: Option<&'static str>,

    /// Strip prompt prefixes from output lines
    pub strip_prompt: bool,

    /// The REPL writes submitted lines back to stdout
    pub echoes_input: bool,

    /// Error signatures
    pub errors: Vec<Regex>,

    pub error_stream: ErrorStream,

    pub framing: Framing,

    /// Statement that prints its argument on a line of its own
    pub print: fn(&str) -> String,

    /// Wraps one user line for execution under the restriction library
    pub wrap: Option<fn(&str) -> String>,

    /// Statements that discard user-defined state
    ///
    /// `None` when the interpreter cannot drop its bindings in place; such
    /// sessions are replaced after every request.
    pub reset: Option<&'static [&'static str]>,

    /// Statements that load the restriction library (path, timeout in ms)
    pub bootstrap: Option<fn(&str, u64) -> Vec<String>>,
}

impl Dialect {
    /// Build the request payload for `code`
    ///
    /// `restricted` routes every user line through the dialect's wrapper,
    /// when it has one.
    pub fn request_payload(&self, markers: &MarkerSet, code: &str, restricted: bool) -> Payload {
        let wrap = self.wrap.filter(|_| restricted);
        let user_lines = code.lines().map(|line| match wrap {
            Some(wrap) => wrap(line),
            None => line.to_string(),
        });

        let lines = match self.framing {
            Framing::Markers => std::iter::once((self.print)(&markers.start))
                .chain(user_lines)
                .chain(std::iter::once((self.print)(&markers.end)))
                .collect(),
            Framing::EndToken(token) => user_lines
                .chain(std::iter::once((self.print)(token)))
                .collect(),
        };

        Payload::from_lines(lines)
    }

    /// Build the reset payload, ending with a print of the reset marker
    pub fn reset_payload(&self, markers: &MarkerSet) -> Payload {
        let lines = self
            .reset
            .unwrap_or_default()
            .iter()
            .map(|s| s.to_string())
            .chain(std::iter::once((self.print)(&markers.reset)))
            .collect();
        Payload::from_lines(lines)
    }

    /// Build the boot payload: the restriction library (when `library` is
    /// given and the dialect supports one) followed by a print of `marker`
    pub fn boot_payload(&self, marker: &str, library: Option<&str>, timeout_ms: u64) -> Payload {
        let mut lines = match (self.bootstrap, library) {
            (Some(bootstrap), Some(library)) => bootstrap(library, timeout_ms),
            _ => Vec::new(),
        };
        lines.push((self.print)(marker));
        Payload::from_lines(lines)
    }

    /// Check if user state can be cleared without restarting the interpreter
    pub fn resets_in_place(&self) -> bool {
        self.reset.is_some()
    }

    /// Check if `text` contains an error signature
    pub fn is_error(&self, text: &str) -> bool {
        self.errors.iter().any(|re| re.is_match(text))
    }

    /// Check if `line` is startup banner noise
    pub fn is_banner_line(&self, line: &str) -> bool {
        self.banner.iter().any(|re| re.is_match(line))
    }

    /// Check if `text` contains the ready signature
    pub fn is_ready(&self, text: &str) -> bool {
        self.ready.as_ref().is_some_and(|re| re.is_match(text))
    }

    /// Remove any number of leading prompts from `line`
    pub fn strip_prompts<'a>(&self, line: &'a str) -> &'a str {
        let Some(prompt) = self.prompt.filter(|p| self.strip_prompt && !p.is_empty()) else {
            return line;
        };

        let mut line = line;
        while let Some(rest) = line.strip_prefix(prompt) {
            line = rest;
        }
        line
    }

    /// Check if `line` is the interpreter echoing one of the submitted `lines`
    pub fn is_echo_of(&self, line: &str, lines: &[String]) -> bool {
        if !self.echoes_input {
            return false;
        }
        let Some(prompt) = self.prompt else {
            return false;
        };
        let Some(rest) = line.strip_prefix(prompt) else {
            return false;
        };

        let rest = rest.trim();
        !rest.is_empty() && lines.iter().any(|submitted| submitted.trim() == rest)
    }
}

static J: LazyLock<Dialect> = LazyLock::new(j::dialect);
static APL: LazyLock<Dialect> = LazyLock::new(apl::dialect);
static KAP: LazyLock<Dialect> = LazyLock::new(kap::dialect);

/// Look up the dialect for a language
pub fn lookup(language: LanguageId) -> &'static Dialect {
    match language {
        LanguageId::J => &J,
        LanguageId::Apl => &APL,
        LanguageId::Kap => &KAP,
    }
}

/// Compile a pattern from the built-in dialect tables
fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in dialect pattern should compile")
}
