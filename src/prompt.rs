//! Prompt assembly.
//!
//! A template is parsed once, at construction, into literal text and three
//! slots: `{context}`, `{history}` and `{question}`. Each slot must appear
//! exactly once; `{{` and `}}` produce literal braces. Rendering walks the
//! parsed segments a single time, so user text that happens to look like a
//! slot is copied verbatim and never expanded.

use std::fmt::Write;

use crate::config::PromptConfig;
use crate::error::{Error, Result};
use crate::models::{ScoredChunk, Turn};

pub const DEFAULT_TEMPLATE: &str = "\
You are a helpful assistant that answers questions about a document collection.
Answer using only the context below. After each statement, cite the passages
you used with their markers, for example [guide.md#0]. If the context does not
contain the answer, say that you do not know.

Context:
{context}

Conversation so far:
{history}

Question: {question}
Answer:";

const NO_CONTEXT: &str = "(no relevant documents)";
const NO_HISTORY: &str = "(no previous messages)";
const CONTINUATION_INDENT: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Context,
    History,
    Question,
}

impl Slot {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "context" => Some(Slot::Context),
            "history" => Some(Slot::History),
            "question" => Some(Slot::Question),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Slot(Slot),
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    segments: Vec<Segment>,
}

impl PromptAssembler {
    pub fn new(template: &str) -> Result<Self> {
        Ok(Self {
            segments: parse(template)?,
        })
    }

    /// Inline `template` wins over `template_path`; otherwise the built-in
    /// [`DEFAULT_TEMPLATE`].
    pub fn from_config(config: &PromptConfig) -> Result<Self> {
        if let Some(ref inline) = config.template {
            return Self::new(inline);
        }
        if let Some(ref path) = config.template_path {
            let text = std::fs::read_to_string(path).map_err(|e| {
                Error::Template(format!("cannot read {}: {}", path.display(), e))
            })?;
            return Self::new(&text);
        }
        Self::new(DEFAULT_TEMPLATE)
    }

    /// Render the prompt. Chunks are rendered in the order given, history
    /// turns are expected oldest first.
    pub fn render(&self, context: &[ScoredChunk], history: &[Turn], question: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(Slot::Context) => render_context(&mut out, context),
                Segment::Slot(Slot::History) => render_history(&mut out, history),
                Segment::Slot(Slot::Question) => push_indented(&mut out, question),
            }
        }
        out
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            segments: parse(DEFAULT_TEMPLATE).unwrap_or_default(),
        }
    }
}

fn parse(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut seen: Vec<Slot> = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(Error::Template("unclosed '{' in template".into()));
                }
                let slot = Slot::from_name(&name).ok_or_else(|| {
                    Error::Template(format!(
                        "unknown placeholder {{{}}}; use {{{{ and }}}} for literal braces",
                        name
                    ))
                })?;
                if seen.contains(&slot) {
                    return Err(Error::Template(format!(
                        "placeholder {{{}}} appears more than once",
                        name
                    )));
                }
                seen.push(slot);
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot(slot));
            }
            '}' => {
                return Err(Error::Template("unmatched '}' in template".into()));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    for (slot, name) in [
        (Slot::Context, "context"),
        (Slot::History, "history"),
        (Slot::Question, "question"),
    ] {
        if !seen.contains(&slot) {
            return Err(Error::Template(format!(
                "template is missing the {{{}}} placeholder",
                name
            )));
        }
    }

    Ok(segments)
}

fn render_context(out: &mut String, context: &[ScoredChunk]) {
    if context.is_empty() {
        out.push_str(NO_CONTEXT);
        return;
    }
    for (i, hit) in context.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = writeln!(out, "{}", hit.chunk.citation().marker());
        push_indented(out, &hit.chunk.text);
    }
}

fn render_history(out: &mut String, history: &[Turn]) {
    if history.is_empty() {
        out.push_str(NO_HISTORY);
        return;
    }
    for (i, turn) in history.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(turn.role.label());
        out.push_str(": ");
        push_indented(out, &turn.text);
    }
}

/// Copy caller-supplied text with every line after the first indented, so it
/// can never start a line with a role prefix or a citation marker.
fn push_indented(out: &mut String, text: &str) {
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.is_empty() {
                out.push_str(CONTINUATION_INDENT);
            }
        }
        out.push_str(line);
    }
}
