// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{Error, Result};

/// Byte offset in the output file at which the next chunk must be written.
///
/// The offset is the running sum of the sizes of all completed writes. It never
/// decreases and is never derived from the size the file reports.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCursor {
    offset: u64,
}

impl WriteCursor {
    /// Creates a cursor positioned at the start of the file.
    #[must_use]
    pub const fn new() -> Self {
        Self { offset: 0 }
    }

    /// The offset of the next write.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Moves the cursor past a completed write of `bytes_written` bytes and returns the
    /// new offset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContractViolation`] if the offset would overflow `u64`.
    pub fn advance(&mut self, bytes_written: usize) -> Result<u64> {
        let next = u64::try_from(bytes_written)
            .ok()
            .and_then(|n| self.offset.checked_add(n))
            .ok_or_else(|| {
                Error::ContractViolation(format!(
                    "advancing offset {} by {bytes_written} bytes overflows",
                    self.offset
                ))
            })?;

        self.offset = next;
        Ok(next)
    }
}
