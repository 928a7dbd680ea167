// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! The storage device behind the emulated card.

use embedded_storage::ReadStorage;
use snafu::prelude::*;

use crate::common::BLOCK_SIZE;

/// A device the emulated card reads its blocks from.
///
/// Probing and mounting the device is the caller's business; the card only
/// needs to know whether it is usable, how big it is and how to read one
/// sector.
pub trait SectorStorage {
    /// The error returned by a failed read.
    type Error: core::fmt::Debug;

    /// Whether the device is mounted and readable.
    fn is_ready(&self) -> bool;

    /// The size of the device in bytes.
    fn capacity_bytes(&self) -> u64;

    /// Read the 512 byte sector `index` into `out`.
    fn read_sector(&mut self, index: u32, out: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error>;
}

/// The error type for [`ReadStorageDevice`] reads.
#[derive(Debug, PartialEq, Snafu)]
pub enum StorageError {
    /// The underlying device failed the read.
    #[snafu(display("Unable to read from the storage device."))]
    Read,

    /// The sector does not have a 32 bit byte offset.
    #[snafu(display("Sector {} is beyond the addressable range.", index))]
    OffsetOverflow {
        /// The requested sector.
        index: u32,
    },
}

/// A [`SectorStorage`] built from an `embedded-storage` device.
///
/// The device is ready when it reports a non-zero capacity.
#[derive(Debug)]
pub struct ReadStorageDevice<D> {
    device: D,
}

impl<D: ReadStorage> ReadStorageDevice<D> {
    /// Wrap `device`.
    pub fn new(device: D) -> Self {
        Self { device }
    }

    /// Give the device back.
    pub fn into_inner(self) -> D {
        self.device
    }
}

impl<D: ReadStorage> SectorStorage for ReadStorageDevice<D> {
    type Error = StorageError;

    fn is_ready(&self) -> bool {
        self.device.capacity() > 0
    }

    fn capacity_bytes(&self) -> u64 {
        self.device.capacity() as u64
    }

    fn read_sector(&mut self, index: u32, out: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        let offset = index
            .checked_mul(BLOCK_SIZE as u32)
            .context(OffsetOverflowSnafu { index })?;

        self.device
            .read(offset, out)
            .map_err(|_| ReadSnafu {}.build())
    }
}
