//! Text post-processor collapsing whitespace around glue and function markers
//!
//! Steppers emit raw text interleaved with marker runes; this writer runs a
//! small state machine over that stream so that consecutive newlines collapse,
//! glue elides surrounding whitespace, and function boundaries join their
//! surrounding text as if inline.

/// Word joiner, preventing a line break at this point.
pub const GLUE: char = '\u{2060}';

/// Marks the start of a function's output. Shift Out, paired with Shift In;
/// neither can occur in story text.
pub const FUNC_START: char = '\u{000e}';

/// Marks the end of a function's output.
pub const FUNC_END: char = '\u{000f}';

/// Marks the end of a stream of text. Flushes a pending `\n` if any content
/// preceded it, resetting the state before e.g. a choice menu.
pub const STREAM_END: char = '\u{0000}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeginText,
    BeginLine,
    InWord,
    Spaces,
    Glue,
    GlueSpace,
    FuncStartBeginText,
    FuncStartBeginLine,
    FuncStartInWord,
    FuncStartSpace,
}

/// Streaming whitespace-collapsing writer.
///
/// Output accumulates in an internal buffer; [`GlueWriter::take`] drains it.
/// [`GlueWriter::write_raw`] bypasses the state machine for driver-inserted
/// text such as choice menus (bracket it with [`GlueWriter::write_end`]).
#[derive(Debug)]
pub struct GlueWriter {
    state: State,
    out: String,
}

impl GlueWriter {
    pub fn new() -> Self {
        Self {
            state: State::BeginText,
            out: String::new(),
        }
    }

    pub fn write_str(&mut self, s: &str) {
        for c in s.chars() {
            self.write_char(c);
        }
    }

    pub fn write_char(&mut self, c: char) {
        self.state = self.transition(c);
    }

    pub fn write_end(&mut self) {
        self.write_char(STREAM_END);
    }

    /// Append text directly, skipping the state machine.
    pub fn write_raw(&mut self, s: &str) {
        self.out.push_str(s);
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Drain the accumulated output.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.out)
    }

    fn emit(&mut self, c: char) {
        self.out.push(c);
    }

    fn transition(&mut self, c: char) -> State {
        use State::*;
        match self.state {
            BeginText => match c {
                '\n' | ' ' => BeginText,
                FUNC_START => FuncStartBeginText,
                FUNC_END | STREAM_END => BeginText,
                GLUE => Glue,
                _ => {
                    self.emit(c);
                    InWord
                }
            },
            FuncStartBeginText => match c {
                '\n' | ' ' => BeginText,
                FUNC_START => FuncStartBeginText,
                FUNC_END | STREAM_END => BeginText,
                GLUE => Glue,
                _ => {
                    self.emit(c);
                    InWord
                }
            },
            BeginLine => match c {
                '\n' | ' ' => BeginLine,
                FUNC_START => FuncStartBeginLine,
                FUNC_END => InWord,
                GLUE => Glue,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit('\n');
                    self.emit(c);
                    InWord
                }
            },
            FuncStartBeginLine => match c {
                '\n' | ' ' => FuncStartBeginLine,
                FUNC_START => FuncStartBeginLine,
                FUNC_END => BeginLine,
                GLUE => Glue,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit('\n');
                    self.emit(c);
                    InWord
                }
            },
            FuncStartInWord => match c {
                '\n' => InWord,
                ' ' => Spaces,
                FUNC_START => FuncStartInWord,
                FUNC_END => InWord,
                GLUE => Glue,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit(c);
                    InWord
                }
            },
            FuncStartSpace => match c {
                '\n' | ' ' => FuncStartSpace,
                FUNC_START => FuncStartSpace,
                FUNC_END => Spaces,
                GLUE => GlueSpace,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit(' ');
                    self.emit(c);
                    InWord
                }
            },
            Glue => match c {
                ' ' => GlueSpace,
                '\n' | GLUE | FUNC_START | FUNC_END => Glue,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit(c);
                    InWord
                }
            },
            GlueSpace => match c {
                ' ' | '\n' | GLUE | FUNC_START | FUNC_END => GlueSpace,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit(' ');
                    self.emit(c);
                    InWord
                }
            },
            InWord => match c {
                ' ' => Spaces,
                '\n' => BeginLine,
                FUNC_START => FuncStartInWord,
                FUNC_END => InWord,
                GLUE => Glue,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit(c);
                    InWord
                }
            },
            Spaces => match c {
                ' ' => Spaces,
                '\n' => BeginLine,
                FUNC_START => FuncStartSpace,
                FUNC_END => Spaces,
                GLUE => GlueSpace,
                STREAM_END => {
                    self.emit('\n');
                    BeginText
                }
                _ => {
                    self.emit(' ');
                    self.emit(c);
                    InWord
                }
            },
        }
    }
}

impl Default for GlueWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the writer over a computed string, preserving surrounding spaces.
///
/// Non-space sentinels are added at both ends and stripped afterwards, so
/// leading and trailing spaces survive the collapse. Used when a
/// string-assembly sub-evaluator returns a computed string onto the value
/// stack.
pub fn strip_inline(s: &str) -> String {
    let mut w = GlueWriter::new();
    w.write_char('^');
    w.write_str(s);
    w.write_char('$');
    let buf = w.take();
    let trimmed = buf.strip_suffix('$').unwrap_or(&buf);
    let trimmed = trimmed.strip_prefix('^').unwrap_or(trimmed);
    trimmed.to_string()
}
