//! Error types for logical path parsing

use thiserror::Error;

/// A logical path that does not fit the scheme
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid logical path: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    pub fn with_position(mut self, pos: usize) -> Self {
        self.position = Some(pos);
        self
    }
}

impl From<nom::Err<nom::error::Error<&str>>> for ParseError {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        match err {
            nom::Err::Incomplete(_) => ParseError::new("Incomplete input"),
            nom::Err::Error(e) | nom::Err::Failure(e) => ParseError::new(format!(
                "unexpected segment near: {:?}",
                e.input.chars().take(20).collect::<String>()
            )),
        }
    }
}
