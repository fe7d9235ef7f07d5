//! Lexical analysis (tokenization) of a command line.
//!
//! Words are separated by whitespace. A single- or double-quoted run keeps its
//! whitespace and stays part of the surrounding word; the quote characters are
//! kept in the token so the parser can decide whether to strip them.

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A whitespace-delimited word, quotes included.
    Word(String),
    /// The pipe operator, `|`.
    PipeOp,
    /// Input redirection symbol, `<`.
    RedirectLeft,
    /// Output redirection symbol, `>`.
    RedirectRight,
    /// Append redirection symbol, `>>`.
    RedirectAppend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingQuote(char),
}

struct LexingFSM<'a> {
    input: std::iter::Peekable<std::str::Chars<'a>>,
    state: LexingState,
    buffer: String,
}

impl<'a> LexingFSM<'a> {
    fn new(line: &'a str) -> Self {
        LexingFSM {
            input: line.chars().peekable(),
            state: LexingState::Start,
            buffer: String::new(),
        }
    }

    /// Runs the machine over the whole line.
    ///
    /// An unterminated quote is not an error: the rest of the line becomes
    /// part of the open word.
    fn make_tokens(mut self) -> Vec<Token> {
        let mut out = Vec::new();

        while let Some(ch) = self.input.next() {
            match self.state {
                LexingState::Start => self.handle_start(ch, &mut out),
                LexingState::ReadingWord => self.handle_word(ch, &mut out),
                LexingState::ReadingQuote(quote) => self.handle_quote(ch, quote),
            }
        }

        self.finish_word(&mut out);
        out
    }

    /// Operators are only recognized where a word could begin, so `a|b`
    /// stays one word while `>out` is an operator followed by a word.
    fn handle_start(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            c if c.is_whitespace() => {}
            '|' => out.push(Token::PipeOp),
            '<' => out.push(Token::RedirectLeft),
            '>' => {
                if self.input.peek() == Some(&'>') {
                    self.input.next();
                    out.push(Token::RedirectAppend);
                } else {
                    out.push(Token::RedirectRight);
                }
            }
            '\'' | '"' => {
                self.buffer.push(ch);
                self.state = LexingState::ReadingQuote(ch);
            }
            c => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
            }
        }
    }

    fn handle_word(&mut self, ch: char, out: &mut Vec<Token>) {
        match ch {
            c if c.is_whitespace() => self.finish_word(out),
            '\'' | '"' => {
                self.buffer.push(ch);
                self.state = LexingState::ReadingQuote(ch);
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_quote(&mut self, ch: char, quote: char) {
        self.buffer.push(ch);
        if ch == quote {
            self.state = LexingState::ReadingWord;
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        if !self.buffer.is_empty() {
            out.push(Token::Word(std::mem::take(&mut self.buffer)));
        }
        self.state = LexingState::Start;
    }
}

/// Split a command line into tokens.
pub fn split_into_tokens(line: &str) -> Vec<Token> {
    LexingFSM::new(line).make_tokens()
}
