// ABOUTME: Character-level quote scanner and tokenizer for WHERE clauses
// ABOUTME: Tracks quote state and escape-pending explicitly so quoting rules live in one place

use crate::error::{Result, TransferError};

/// Scanner state between two characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Outside any quoted literal.
    Normal,
    /// Inside a literal opened by the given quote character.
    Quoted(char),
    /// Inside a literal, right after a backslash.
    Escaped(char),
    /// Inside a literal, right after a quote that either closes it or starts a doubled escape.
    QuotePending(char),
}

/// What one scanned character means once its state is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Character outside any literal.
    Code(char),
    /// A literal opens.
    Open(char),
    /// A character belonging to the literal's logical value.
    Literal(char),
    /// A literal closed just before the current character.
    Close,
}

/// Explicit quote/escape state machine shared by the validator and tokenizer.
///
/// Inside a literal, `\x` yields `x` when `x` is the active quote or a
/// backslash and otherwise keeps both characters; a doubled quote yields one
/// quote. A backslash-escaped quote outside a literal never opens one.
#[derive(Debug, Clone)]
pub struct QuoteScanner {
    state: ScanState,
    escape_outside: bool,
}

impl Default for QuoteScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteScanner {
    pub fn new() -> Self {
        Self {
            state: ScanState::Normal,
            escape_outside: false,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Feed one character and collect the events it produces.
    pub fn step(&mut self, ch: char, events: &mut Vec<Event>) {
        match self.state {
            ScanState::Normal => {
                if self.escape_outside {
                    self.escape_outside = false;
                    events.push(Event::Code(ch));
                } else if ch == '\'' || ch == '"' {
                    self.state = ScanState::Quoted(ch);
                    events.push(Event::Open(ch));
                } else {
                    self.escape_outside = ch == '\\';
                    events.push(Event::Code(ch));
                }
            }
            ScanState::Quoted(q) => {
                if ch == '\\' {
                    self.state = ScanState::Escaped(q);
                } else if ch == q {
                    self.state = ScanState::QuotePending(q);
                } else {
                    events.push(Event::Literal(ch));
                }
            }
            ScanState::Escaped(q) => {
                self.state = ScanState::Quoted(q);
                if ch != q && ch != '\\' {
                    events.push(Event::Literal('\\'));
                }
                events.push(Event::Literal(ch));
            }
            ScanState::QuotePending(q) => {
                if ch == q {
                    self.state = ScanState::Quoted(q);
                    events.push(Event::Literal(q));
                } else {
                    self.state = ScanState::Normal;
                    events.push(Event::Close);
                    self.step(ch, events);
                }
            }
        }
    }

    /// Signal end of input; returns `Close` if a literal was waiting on it.
    pub fn finish(&mut self) -> Option<Event> {
        if let ScanState::QuotePending(_) = self.state {
            self.state = ScanState::Normal;
            return Some(Event::Close);
        }
        None
    }

    /// True when no literal is left open.
    pub fn is_balanced(&self) -> bool {
        matches!(self.state, ScanState::Normal | ScanState::QuotePending(_))
    }
}

/// Whether every quote in the clause is closed, ignoring escaped and doubled quotes.
///
/// # Examples
///
/// ```
/// # use dbtransfer::where_clause::scanner::quotes_balanced;
/// assert!(quotes_balanced("name = 'O''Brien'"));
/// assert!(quotes_balanced(r"name = 'O\'Brien'"));
/// assert!(!quotes_balanced("name = 'open"));
/// ```
pub fn quotes_balanced(clause: &str) -> bool {
    let mut scanner = QuoteScanner::new();
    let mut events = Vec::new();
    for ch in clause.chars() {
        scanner.step(ch, &mut events);
        events.clear();
    }
    scanner.is_balanced()
}

/// Whether parentheses outside literals nest correctly.
pub fn parens_balanced(clause: &str) -> bool {
    let mut scanner = QuoteScanner::new();
    let mut events = Vec::new();
    let mut depth: i64 = 0;
    for ch in clause.chars() {
        scanner.step(ch, &mut events);
        for event in events.drain(..) {
            match event {
                Event::Code('(') => depth += 1,
                Event::Code(')') => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
    depth == 0
}

/// Lexical unit of a WHERE clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identifier, keyword or unquoted value.
    Word(String),
    /// Quoted literal with escapes already undone.
    Quoted(String),
    /// Comparison operator.
    Operator(String),
    LParen,
    RParen,
    Comma,
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-' | '+' | ':' | '@')
}

/// Split a clause into tokens.
///
/// Multi-character operators are matched before their single-character
/// prefixes.
pub fn tokenize(clause: &str) -> Result<Vec<Token>> {
    let mut scanner = QuoteScanner::new();
    let mut events = Vec::new();
    for ch in clause.chars() {
        scanner.step(ch, &mut events);
    }
    if let Some(event) = scanner.finish() {
        events.push(event);
    }
    if !scanner.is_balanced() {
        return Err(TransferError::Validation("unterminated quoted value".to_string()));
    }

    let mut tokens = Vec::new();
    let mut literal: Option<String> = None;
    let mut word = String::new();
    let mut after_literal = false;
    let mut iter = events.into_iter().peekable();

    let flush_word = |word: &mut String, tokens: &mut Vec<Token>| {
        if !word.is_empty() {
            tokens.push(Token::Word(std::mem::take(word)));
        }
    };

    while let Some(event) = iter.next() {
        match event {
            Event::Open(_) => {
                if !word.is_empty() || after_literal {
                    return Err(TransferError::Validation(format!(
                        "unexpected quote after '{}'",
                        if word.is_empty() { "quoted value" } else { word.as_str() }
                    )));
                }
                literal = Some(String::new());
            }
            Event::Literal(ch) => {
                if let Some(value) = literal.as_mut() {
                    value.push(ch);
                }
            }
            Event::Close => {
                if let Some(value) = literal.take() {
                    tokens.push(Token::Quoted(value));
                }
                after_literal = true;
            }
            Event::Code(ch) => {
                if is_word_char(ch) {
                    if after_literal {
                        return Err(TransferError::Validation(format!(
                            "unexpected '{}' after quoted value",
                            ch
                        )));
                    }
                    word.push(ch);
                    continue;
                }
                after_literal = false;
                flush_word(&mut word, &mut tokens);
                match ch {
                    c if c.is_whitespace() => {}
                    '(' => tokens.push(Token::LParen),
                    ')' => tokens.push(Token::RParen),
                    ',' => tokens.push(Token::Comma),
                    '<' | '>' | '!' | '=' => {
                        let next = iter.peek().copied();
                        let op = match (ch, next) {
                            ('<', Some(Event::Code('='))) => "<=",
                            ('>', Some(Event::Code('='))) => ">=",
                            ('!', Some(Event::Code('='))) => "!=",
                            ('<', Some(Event::Code('>'))) => "<>",
                            ('!', _) => {
                                return Err(TransferError::Validation(
                                    "unexpected '!' without '='".to_string(),
                                ))
                            }
                            ('<', _) => "<",
                            ('>', _) => ">",
                            _ => "=",
                        };
                        if op.len() == 2 {
                            iter.next();
                        }
                        tokens.push(Token::Operator(op.to_string()));
                    }
                    other => {
                        return Err(TransferError::Validation(format!(
                            "unexpected character '{}'",
                            other
                        )))
                    }
                }
            }
        }
    }
    flush_word(&mut word, &mut tokens);
    Ok(tokens)
}
