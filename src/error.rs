//! Error taxonomy (Section 7). Corruption and programmer errors end the
//! current operation; I/O errors are recorded on the frame and retried on
//! next touch rather than surfaced here (see `io_coordinator`).

use crate::tag::Tag;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("page {tag} failed checksum verification")]
    Corruption { tag: Tag },

    #[error("no unpinned buffers available after {passes} clock-sweep passes")]
    NoUnpinnedBuffers { passes: u32 },

    #[error("cannot extend relation beyond {max_blocks} blocks")]
    RelationTooLarge { max_blocks: u32 },

    #[error("buffer for {tag} already has a cleanup-lock waiter")]
    MultipleCleanupWaiters { tag: Tag },

    #[error("programmer error: {0}")]
    Programmer(String),

    #[error("I/O error on {tag}: {source}")]
    Io {
        tag: Tag,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn programmer(msg: impl Into<String>) -> Self {
        Error::Programmer(msg.into())
    }
}
