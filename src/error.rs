use thiserror::Error;

/// Raised when a raw message does not match the protocol grammar.
///
/// The offending message is carried in every variant so it can be logged
/// and dropped; one undecodable message never tears the connection down.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("unknown message tag {tag:?} in {raw:?}")]
    UnknownTag { tag: char, raw: String },
    #[error("expected {expected} at byte {at} of {raw:?}")]
    Expected {
        expected: &'static str,
        at: usize,
        raw: String,
    },
    #[error("number too large at byte {at} of {raw:?}")]
    NumberOverflow { at: usize, raw: String },
    #[error("empty-slot run of {run} at byte {at} exceeds any supported grid in {raw:?}")]
    RunTooLong { run: u32, at: usize, raw: String },
}
