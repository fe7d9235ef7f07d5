//! Assembly of tokens into a [`Pipeline`] of stages.

use crate::command::{Pipeline, RedirectSlot, Stage};
use crate::lexer::{self, Token};
use thiserror::Error;

/// Longest line, in bytes, accepted when no other limit is configured.
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;

/// Errors that can occur while turning a line into a pipeline.
///
/// Malformed input is otherwise tolerated: blank lines give a no-op stage and
/// a redirection operator without a target is ignored.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The line exceeds the configured length limit.
    #[error("line too long: {len} bytes (limit {max})")]
    LineTooLong { len: usize, max: usize },
}

struct PipelineBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl PipelineBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        PipelineBuilder { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse a pipeline: stage ('|' stage)*
    fn build(mut self) -> Vec<Stage> {
        let mut stages = vec![self.parse_stage()];
        while let Some(Token::PipeOp) = self.peek() {
            self.consume();
            stages.push(self.parse_stage());
        }
        stages
    }

    /// Parse a stage: (word | redirect)* up to the next `|`.
    fn parse_stage(&mut self) -> Stage {
        let mut stage: Option<Stage> = None;
        let mut redirects = Vec::new();

        while !matches!(self.peek(), None | Some(Token::PipeOp)) {
            let slot = match self.consume() {
                Some(Token::Word(raw)) => {
                    let arg = unquote(&raw).to_string();
                    match stage.as_mut() {
                        Some(stage) => stage.args.push(arg),
                        None => stage = Some(Stage::new(arg)),
                    }
                    continue;
                }
                Some(Token::RedirectLeft) => RedirectSlot::Input,
                Some(Token::RedirectRight) => RedirectSlot::Truncate,
                Some(Token::RedirectAppend) => RedirectSlot::Append,
                Some(Token::PipeOp) | None => break,
            };
            if let Some(Token::Word(_)) = self.peek() {
                if let Some(Token::Word(target)) = self.consume() {
                    redirects.push((slot, unquote(&target).to_string()));
                }
            }
        }

        let mut stage = stage.unwrap_or_default();
        for (slot, target) in redirects {
            stage.redirects.set(slot, target);
        }
        stage
    }
}

/// Strip one pair of matching quotes wrapping the whole word.
///
/// Words of two characters or fewer are left alone, so `''` and `""` stay
/// literal.
pub fn unquote(word: &str) -> &str {
    let bytes = word.as_bytes();
    let len = bytes.len();
    if len > 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[len - 1] == bytes[0] {
        &word[1..len - 1]
    } else {
        word
    }
}

/// Parse one line of input into a pipeline.
///
/// The line is trimmed first. A trailing bare `&` marks the pipeline as
/// background and a trailing bare `?` requests completion; a bare `&` that
/// is not last is dropped.
pub fn parse_line(line: &str, max_len: usize) -> Result<Pipeline, ParseError> {
    if line.len() > max_len {
        return Err(ParseError::LineTooLong {
            len: line.len(),
            max: max_len,
        });
    }

    let mut tokens = lexer::split_into_tokens(line.trim());
    if tokens.is_empty() {
        return Ok(Pipeline::noop());
    }

    let mut background = false;
    let mut autocomplete = false;
    match tokens.last() {
        Some(Token::Word(w)) if w == "&" => background = true,
        Some(Token::Word(w)) if w == "?" => autocomplete = true,
        _ => {}
    }
    if background || autocomplete {
        tokens.pop();
    }
    tokens.retain(|t| !matches!(t, Token::Word(w) if w == "&"));

    let stages = PipelineBuilder::from(tokens).build();
    Ok(Pipeline {
        stages,
        background,
        autocomplete,
    })
}
