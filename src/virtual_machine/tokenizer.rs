//! Line tokenizer for assembly source.
//!
//! Lines are tokenized one at a time, but a [`Tokenizer`] remembers an open
//! `/* ... */` comment so block comments can span lines. Token classes are purely
//! lexical: `@name` is a label, a run of digits and dots is a number, a double
//! quoted run is a string and anything else is a bareword.

use crate::virtual_machine::errors::VMError;

/// Lexical class of a token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenKind {
    /// `@name`; holds the name without the `@`.
    Label(String),
    /// `"..."` with escapes resolved.
    Str(String),
    /// Digits and `.` only.
    Number(String),
    /// Mnemonic or anything unrecognized.
    Word(String),
}

/// A token with its 1-based source column.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub column: usize,
}

impl Token {
    /// Token text as written, minus quotes for strings.
    pub fn text(&self) -> String {
        match &self.kind {
            TokenKind::Label(name) => format!("@{name}"),
            TokenKind::Str(text) | TokenKind::Number(text) | TokenKind::Word(text) => text.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Mode {
    Normal,
    /// Inside `"..."`; `escape` is set right after a backslash.
    Str { escape: bool },
    /// A `/` was seen and the next character decides what it is.
    Slash,
    /// Inside `/* ... */`; `star` is set right after a `*`.
    BlockComment { star: bool },
}

/// Error raised while tokenizing, with its 1-based column.
#[derive(Debug)]
pub struct LexError {
    pub column: usize,
    pub error: VMError,
}

/// Tokenizer state carried from line to line.
#[derive(Debug)]
pub struct Tokenizer {
    mode: Mode,
    /// Line where the open block comment started.
    comment_line: usize,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bareword or string being collected on the current line.
struct Pending {
    tokens: Vec<Token>,
    text: String,
    start: usize,
}

impl Pending {
    fn append(&mut self, c: char, column: usize) {
        if self.text.is_empty() {
            self.start = column;
        }
        self.text.push(c);
    }

    /// Classifies and emits the current bareword, if any.
    fn flush(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let kind = if let Some(name) = text.strip_prefix('@') {
            TokenKind::Label(name.to_string())
        } else if text.chars().all(|c| c.is_ascii_digit() || c == '.') {
            TokenKind::Number(text)
        } else {
            TokenKind::Word(text)
        };
        self.tokens.push(Token {
            kind,
            column: self.start,
        });
    }

    fn emit_string(&mut self) {
        let text = std::mem::take(&mut self.text);
        self.tokens.push(Token {
            kind: TokenKind::Str(text),
            column: self.start,
        });
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            mode: Mode::Normal,
            comment_line: 0,
        }
    }

    /// Tokenizes one line. `line_no` is only used to report unterminated comments.
    pub fn tokenize_line(&mut self, line_no: usize, line: &str) -> Result<Vec<Token>, LexError> {
        let mut pending = Pending {
            tokens: Vec::new(),
            text: String::new(),
            start: 0,
        };
        let mut string_start = 0;

        for (i, c) in line.chars().enumerate() {
            let column = i + 1;
            match self.mode {
                Mode::Normal => self.normal(&mut pending, c, column, &mut string_start),
                Mode::Slash => match c {
                    '/' => {
                        // Line comment: drop the rest.
                        self.mode = Mode::Normal;
                        pending.flush();
                        return Ok(pending.tokens);
                    }
                    '*' => {
                        pending.flush();
                        self.mode = Mode::BlockComment { star: false };
                        self.comment_line = line_no;
                    }
                    _ => {
                        pending.append('/', column - 1);
                        self.mode = Mode::Normal;
                        self.normal(&mut pending, c, column, &mut string_start);
                    }
                },
                Mode::Str { escape: true } => {
                    pending.text.push(c);
                    self.mode = Mode::Str { escape: false };
                }
                Mode::Str { escape: false } => match c {
                    '\\' => self.mode = Mode::Str { escape: true },
                    '"' => {
                        pending.emit_string();
                        self.mode = Mode::Normal;
                    }
                    _ => pending.text.push(c),
                },
                Mode::BlockComment { star } => {
                    self.mode = match c {
                        '/' if star => Mode::Normal,
                        '*' => Mode::BlockComment { star: true },
                        _ => Mode::BlockComment { star: false },
                    };
                }
            }
        }

        match self.mode {
            Mode::Str { .. } => {
                self.mode = Mode::Normal;
                return Err(LexError {
                    column: string_start,
                    error: VMError::UnterminatedString,
                });
            }
            Mode::Slash => {
                let column = line.chars().count();
                pending.append('/', column);
                self.mode = Mode::Normal;
            }
            Mode::BlockComment { .. } => self.mode = Mode::BlockComment { star: false },
            Mode::Normal => {}
        }
        pending.flush();
        Ok(pending.tokens)
    }

    fn normal(&mut self, pending: &mut Pending, c: char, column: usize, string_start: &mut usize) {
        match c {
            '/' => self.mode = Mode::Slash,
            '"' => {
                pending.flush();
                pending.start = column;
                *string_start = column;
                self.mode = Mode::Str { escape: false };
            }
            ' ' | '\t' | '\r' => pending.flush(),
            _ => pending.append(c, column),
        }
    }

    /// Checks the end of input. Fails if a block comment is still open.
    pub fn finish(&self) -> Result<(), VMError> {
        match self.mode {
            Mode::BlockComment { .. } => Err(VMError::UnterminatedComment {
                line: self.comment_line,
            }),
            _ => Ok(()),
        }
    }

    /// Returns the line where the currently open block comment started, if any.
    pub fn open_comment(&self) -> Option<usize> {
        matches!(self.mode, Mode::BlockComment { .. }).then_some(self.comment_line)
    }
}
