//! Type definitions for L2CAP operations

use thiserror::Error;

/// Error types specific to L2CAP operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum L2capError {
    #[error("Truncated {what}: need {needed} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        needed: usize,
        actual: usize,
    },
}

/// Result type for L2CAP operations
pub type L2capResult<T> = std::result::Result<T, L2capError>;

pub(crate) fn ensure_len(what: &'static str, data: &[u8], needed: usize) -> L2capResult<()> {
    if data.len() < needed {
        return Err(L2capError::Truncated {
            what,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}
