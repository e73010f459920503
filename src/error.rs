use thiserror::Error;

use crate::address::Ppa;
use crate::config::{LineId, Lpn, StreamId};
use crate::line::PageStatus;

/// FTL specialized Result type.
pub type Result<T> = std::result::Result<T, FtlError>;

/// Invariant violations raised by the translation layer.
///
/// None of these are retried internally, the caller decides between
/// log-and-abort and structured recovery.
#[derive(Error, Debug)]
pub enum FtlError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("LPN {lpn} out of range, partition maps {total} pages")]
    LpnOutOfRange { lpn: Lpn, total: usize },

    #[error("Physical address {0} is outside the configured geometry")]
    InvalidPpa(Ppa),

    #[error("Page {ppa} is {found:?}, expected {expected:?}")]
    PageState {
        ppa: Ppa,
        expected: PageStatus,
        found: PageStatus,
    },

    #[error("Flat page index {index} out of range, geometry holds {total} pages")]
    PageIndexOutOfRange { index: usize, total: usize },

    #[error("No free line left")]
    NoFreeLine,

    #[error("Stream {0} has no write pointer")]
    InvalidStream(StreamId),

    #[error("Victim page {0} was never written")]
    UnwrittenVictimPage(Ppa),

    #[error("Valid page {0} has no reverse mapping")]
    MissingReverseMapping(Ppa),

    #[error("Block at {0} still holds valid pages")]
    EraseLiveBlock(Ppa),

    #[error("Accounting mismatch on line {line}: {detail}")]
    Accounting { line: LineId, detail: String },
}

impl FtlError {
    pub(crate) fn accounting(line: LineId, detail: impl Into<String>) -> Self {
        FtlError::Accounting {
            line,
            detail: detail.into(),
        }
    }
}
