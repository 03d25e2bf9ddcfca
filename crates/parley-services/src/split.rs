//! Bracket- and quote-aware argument splitting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BRACKET_PAIRS: [(char, char); 3] = [('(', ')'), ('[', ']'), ('{', '}')];
const ESCAPE: char = '\\';

/// Error returned when input cannot be split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("unclosed quote {0:?}")]
    UnclosedQuote(char),
    #[error("unclosed bracket {0:?}")]
    UnclosedBracket(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Options controlling [`split_args`].
pub struct SplitOptions {
    pub separator: char,
    /// Keep `()`, `[]`, and `{}` groups together, brackets included.
    pub brackets: bool,
    /// Characters that open and close a quoted group.
    pub quotes: Vec<char>,
    /// Keep the quote characters in the produced argument.
    pub keep_quotes: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            separator: ' ',
            brackets: true,
            quotes: vec!['"'],
            keep_quotes: false,
        }
    }
}

/// Splits `input` on the separator, keeping bracketed and quoted groups
/// intact. A backslash escapes the following character.
pub fn split_args(input: &str, options: &SplitOptions) -> Result<Vec<String>, SplitError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut brackets: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == ESCAPE {
            if let Some(escaped) = chars.next() {
                current.push(escaped);
            }
            continue;
        }

        if let Some(open) = quote {
            if ch == open {
                quote = None;
                if options.keep_quotes {
                    current.push(ch);
                }
            } else {
                current.push(ch);
            }
            continue;
        }

        if options.brackets {
            if let Some((_, close)) = BRACKET_PAIRS.iter().find(|(open, _)| *open == ch) {
                brackets.push(*close);
                current.push(ch);
                continue;
            }
            if brackets.last() == Some(&ch) {
                brackets.pop();
                current.push(ch);
                continue;
            }
            if !brackets.is_empty() {
                current.push(ch);
                continue;
            }
        }

        if options.quotes.contains(&ch) {
            quote = Some(ch);
            if options.keep_quotes {
                current.push(ch);
            }
            continue;
        }

        if ch == options.separator {
            args.push(std::mem::take(&mut current));
            continue;
        }
        current.push(ch);
    }

    if let Some(open) = quote {
        return Err(SplitError::UnclosedQuote(open));
    }
    if let Some(close) = brackets.last() {
        let open = BRACKET_PAIRS
            .iter()
            .find(|(_, candidate)| candidate == close)
            .map(|(open, _)| *open)
            .unwrap_or(*close);
        return Err(SplitError::UnclosedBracket(open));
    }
    args.push(current);
    Ok(args)
}
