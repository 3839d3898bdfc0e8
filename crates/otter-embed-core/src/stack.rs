//! Stack trace text and its frame grammar.
//!
//! Engines report stacks as text: a header (the error's `name: message`,
//! possibly spanning several lines) followed by one `at ...` line per frame.
//! Three frame shapes are recognized, most specific first:
//!
//! ```text
//!     at fn (file:row:col)      at fn (file:row)
//!     at fn (file)
//!     at file:row:col           at file:row        at file
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::LazyLock;

static LOCATED_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at (?P<new>new )?(?P<func>\S.*?) \((?P<file>.*?):(?P<row>\d+)(?::(?P<col>\d+))?\)$")
        .expect("valid frame regex")
});

static NAMED_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at (?P<new>new )?(?P<func>\S.*?) \((?P<file>.*)\)$").expect("valid frame regex")
});

static ANONYMOUS_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at (?P<file>\S.*?)(?::(?P<row>\d+)(?::(?P<col>\d+))?)?$")
        .expect("valid frame regex")
});

/// One parsed stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub function_name: Option<String>,
    pub script_name: Option<String>,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
    pub is_eval: bool,
    pub is_constructor: bool,
}

impl Frame {
    /// Tuple view `(function, script, line, column)`.
    pub fn as_tuple(&self) -> (Option<&str>, Option<&str>, Option<u32>, Option<u32>) {
        (
            self.function_name.as_deref(),
            self.script_name.as_deref(),
            self.line_number,
            self.column_number,
        )
    }
}

/// A captured stack trace: the exact engine text plus its parsed frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTrace {
    text: String,
    frames: Vec<Frame>,
}

impl StackTrace {
    /// Parse engine stack text. Panics on a malformed frame line.
    pub fn parse(text: impl Into<String>) -> Self {
        let text = text.into();
        let frames = parse_stack(&text);
        Self { text, frames }
    }

    /// Parse engine stack text for an error whose `name: message` header is
    /// known. See [`parse_stack_with_header`].
    pub fn parse_with_header(text: impl Into<String>, header: &str) -> Self {
        let text = text.into();
        let frames = parse_stack_with_header(&text, header);
        Self { text, frames }
    }

    /// Parse stack text that script could have written. Never panics.
    pub fn parse_lenient(text: impl Into<String>) -> Self {
        let text = text.into();
        let frames = parse_stack_lenient(&text);
        Self { text, frames }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Write the stack exactly as the engine produced it.
    pub fn print(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        sink.write_all(self.text.as_bytes())
    }
}

fn is_frame_line(line: &str) -> bool {
    line.trim_start().starts_with("at ")
}

fn number(caps: &regex::Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn is_eval_origin(file: &str) -> bool {
    file == "(eval)" || file.starts_with("eval at ")
}

fn parse_frame(line: &str) -> Option<Frame> {
    for re in [&*LOCATED_FRAME, &*NAMED_FRAME] {
        if let Some(caps) = re.captures(line) {
            let func = caps["func"].to_string();
            let file = caps["file"].to_string();
            return Some(Frame {
                is_eval: func == "eval" || is_eval_origin(&file),
                is_constructor: caps.name("new").is_some(),
                function_name: Some(func),
                script_name: Some(file),
                line_number: number(&caps, "row"),
                column_number: number(&caps, "col"),
            });
        }
    }

    ANONYMOUS_FRAME.captures(line).map(|caps| {
        let file = caps["file"].to_string();
        Frame {
            function_name: None,
            is_eval: is_eval_origin(&file),
            is_constructor: false,
            script_name: Some(file),
            line_number: number(&caps, "row"),
            column_number: number(&caps, "col"),
        }
    })
}

/// Parse stack text into frames.
///
/// Lines before the first `at` line form the header and are skipped. Every
/// line after it must be a frame; anything else means the engine produced a
/// stack this grammar does not understand, which is a bug, so it panics.
pub fn parse_stack(text: &str) -> Vec<Frame> {
    frames(text.lines().skip_while(|line| !is_frame_line(line)), true)
}

/// Parse stack text whose header is known to be `header`.
///
/// Message lines can look like frames, so the header is skipped by its line
/// count rather than by the grammar. Text that does not start with `header`
/// was rewritten by script and is parsed leniently.
pub fn parse_stack_with_header(text: &str, header: &str) -> Vec<Frame> {
    match text.strip_prefix(header) {
        Some(rest) if rest.is_empty() || rest.starts_with('\n') => frames(rest.lines(), true),
        _ => parse_stack_lenient(text),
    }
}

/// Parse stack text without trusting its shape: unrecognized lines are
/// skipped instead of treated as fatal.
pub fn parse_stack_lenient(text: &str) -> Vec<Frame> {
    frames(text.lines().skip_while(|line| !is_frame_line(line)), false)
}

fn frames<'a>(lines: impl Iterator<Item = &'a str>, strict: bool) -> Vec<Frame> {
    lines
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_frame(line) {
            Some(frame) => Some(frame),
            None if strict => {
                tracing::error!(line, "unrecognized stack frame");
                panic!("unrecognized stack frame line: {line:?}");
            }
            None => {
                tracing::debug!(line, "skipping unrecognized stack line");
                None
            }
        })
        .collect()
}
