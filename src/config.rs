// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! Bus and engine configuration.
//!
//! The chunk size is a property of the bus peripheral, not of the card
//! protocol: every response is padded to a multiple of it so the bus always
//! exchanges whole chunks.

use snafu::prelude::*;

/// The largest chunk the engine can exchange in one bus transfer.
pub const MAX_CHUNK_SIZE: usize = 64;

/// The chunk size used when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Configuration passed to [`SdProxy::initialize`](crate::SdProxy::initialize).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Bytes exchanged with the host per bus transfer.
    pub chunk_size: usize,

    /// Check the CRC7 of every command frame.
    ///
    /// When this is `false` only CMD0, CMD8 and the frames received after the
    /// host turned CRC checking on with CRC_ON_OFF are checked.
    pub enforce_crc: bool,
}

/// The error type for an invalid [`Config`].
#[derive(Debug, PartialEq, Snafu)]
pub enum ConfigError {
    /// The chunk size is zero or larger than [`MAX_CHUNK_SIZE`].
    #[snafu(display("Chunk size {} is not in 1..={}.", size, MAX_CHUNK_SIZE))]
    ChunkSize {
        /// The rejected chunk size.
        size: usize,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            enforce_crc: true,
        }
    }
}

impl Config {
    /// Set the chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set whether every frame is CRC checked.
    pub fn with_enforce_crc(mut self, enforce_crc: bool) -> Self {
        self.enforce_crc = enforce_crc;
        self
    }

    /// Check that the engine can run with this configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            (1..=MAX_CHUNK_SIZE).contains(&self.chunk_size),
            ChunkSizeSnafu {
                size: self.chunk_size
            }
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn zero_chunk_size_is_error() {
        let result = Config::default().with_chunk_size(0).validate();

        assert_eq!(result, Err(ConfigError::ChunkSize { size: 0 }));
    }

    #[test]
    fn oversized_chunk_is_error() {
        let result = Config::default()
            .with_chunk_size(MAX_CHUNK_SIZE + 1)
            .validate();

        assert_eq!(
            result,
            Err(ConfigError::ChunkSize {
                size: MAX_CHUNK_SIZE + 1
            })
        );
    }

    #[test]
    fn largest_chunk_is_valid() {
        let result = Config::default().with_chunk_size(MAX_CHUNK_SIZE).validate();

        assert_eq!(result, Ok(()));
    }
}
