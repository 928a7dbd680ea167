// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! Types to support SD Card SPI Mode responses.
//!
//! Every response starts with an [`R1Response`] even if the response format
//! for the command at issue is a different format. The other formats the
//! emulated card produces append bytes to the R1 token:
//!     - R2: one status byte ([`R2Status`])
//!     - R3: the 4 byte OCR
//!     - R7: the echoed voltage and check pattern
//!
//! Responses and data blocks are queued in a [`TxQueue`] that hands them to
//! the bus one chunk at a time.

use core::ops::{BitAnd, BitOr};

use crate::{
    checksum,
    common::{BLOCK_SIZE, DATA_START_BLOCK, FILLER, VOLTAGE_2_7_TO_3_6},
    config::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE},
};

/// Newtype for the R1 response token.
///
/// This type is based on section 7.3.2.1 of the Simplified Specification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct R1Response(u8);

/// Newtype for the status byte that follows R1 in an R2 response.
///
/// This type is based on section 7.3.2.3 of the Simplified Specification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct R2Status(u8);

/// A response to one command: an R1 token and up to 4 more bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response {
    token: R1Response,
    extra: [u8; 4],
    extra_len: usize,
}

impl R1Response {
    /// Wrap a raw token.
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// The raw token.
    pub fn bits(self) -> u8 {
        self.0
    }
}

// The token values from section 7.3.2.1 of the Simplified Specification.
#[allow(missing_docs)]
impl R1Response {
    pub const READY: R1Response = R1Response(0);
    pub const IDLE: R1Response = R1Response(0b0000_0001);
    pub const ERASE_RESET: R1Response = R1Response(0b0000_0010);
    pub const ILLEGAL_COMMAND: R1Response = R1Response(0b0000_0100);
    pub const COM_CRC_ERROR: R1Response = R1Response(0b0000_1000);
    pub const ERASE_SEQUENCE_ERROR: R1Response = R1Response(0b0001_0000);
    pub const ADDRESS_ERROR: R1Response = R1Response(0b0010_0000);
    pub const PARAMETER_ERROR: R1Response = R1Response(0b0100_0000);
}

impl R2Status {
    /// Wrap a raw status byte.
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    /// The raw status byte.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `rhs` is set.
    pub fn contains(self, rhs: Self) -> bool {
        (self & rhs) == rhs
    }
}

// Section 7.3.2.3 of the Simplified Specification. WP_ERASE_SKIP doubles as
// the "write protected" report for a card that refuses every write.
#[allow(missing_docs)]
impl R2Status {
    pub const READY: R2Status = R2Status(0);
    pub const CARD_LOCKED: R2Status = R2Status(0b0000_0001);
    pub const WP_ERASE_SKIP: R2Status = R2Status(0b0000_0010);
    pub const WRITE_PROTECTED: R2Status = R2Status::WP_ERASE_SKIP;
    pub const ERROR: R2Status = R2Status(0b0000_0100);
    pub const CC_ERROR: R2Status = R2Status(0b0000_1000);
    pub const CARD_ECC_FAILED: R2Status = R2Status(0b0001_0000);
    pub const WP_VIOLATION: R2Status = R2Status(0b0010_0000);
    pub const ERASE_PARAM: R2Status = R2Status(0b0100_0000);
    pub const OUT_OF_RANGE: R2Status = R2Status(0b1000_0000);
}

impl BitAnd for R2Status {
    type Output = R2Status;

    fn bitand(self, rhs: Self) -> Self::Output {
        R2Status(self.0 & rhs.0)
    }
}

impl BitOr for R2Status {
    type Output = R2Status;

    fn bitor(self, rhs: Self) -> Self::Output {
        R2Status(self.0 | rhs.0)
    }
}

/// The OCR the card reports to READ_OCR (R3).
///
/// Power up status (bit 31) and Card Capacity Status (bit 30) are set, and
/// the voltage window is 2.7-3.6 V (bits 23..15). See section 5.1.
pub const OCR: u32 = 0b1100_0000_1111_1111_1000_0000_0000_0000;

/// The 4 bytes that follow R1 in the R7 response to SEND_IF_COND.
///
/// The card accepts 2.7-3.6 V and echoes the check pattern from the low
/// byte of the argument (section 7.3.2.6).
pub fn if_cond_payload(arg: u32) -> [u8; 4] {
    [0, 0, VOLTAGE_2_7_TO_3_6, arg as u8]
}

impl Response {
    /// An R1 only response.
    pub fn new(token: R1Response) -> Self {
        Self {
            token,
            extra: [0; 4],
            extra_len: 0,
        }
    }

    /// An R2 response.
    pub fn with_status(token: R1Response, status: R2Status) -> Self {
        Self {
            token,
            extra: [status.0, 0, 0, 0],
            extra_len: 1,
        }
    }

    /// An R3 or R7 response.
    pub fn with_payload(token: R1Response, payload: [u8; 4]) -> Self {
        Self {
            token,
            extra: payload,
            extra_len: 4,
        }
    }

    /// The R1 token.
    pub fn token(&self) -> R1Response {
        self.token
    }

    /// The bytes after the R1 token.
    pub fn extra(&self) -> &[u8] {
        &self.extra[..self.extra_len]
    }
}

/// Filler bytes the card sends before the R1 token (NCR).
pub const RESPONSE_DELAY: usize = 2;

/// Filler bytes the card sends before a Start Block token (NAC).
pub const DATA_DELAY: usize = 1;

/// The unpadded length of a data block response.
pub const DATA_BLOCK_LEN: usize = DATA_DELAY + 1 + BLOCK_SIZE + 2;

const TX_BUFFER_SIZE: usize = DATA_BLOCK_LEN + MAX_CHUNK_SIZE;

/// Bytes waiting to be sent to the host, padded to whole chunks.
#[derive(Debug)]
pub struct TxQueue {
    buffer: [u8; TX_BUFFER_SIZE],
    len: usize,
    pos: usize,
    chunk_size: usize,
}

impl Default for TxQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl TxQueue {
    /// An empty queue for chunks of `chunk_size` bytes.
    ///
    /// `chunk_size` is clamped to 1..=[`MAX_CHUNK_SIZE`].
    pub const fn new(chunk_size: usize) -> Self {
        Self {
            buffer: [FILLER; TX_BUFFER_SIZE],
            len: 0,
            pos: 0,
            chunk_size: clamp_chunk(chunk_size),
        }
    }

    /// Change the chunk size and drop anything queued.
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = clamp_chunk(chunk_size);
        self.clear();
    }

    /// The chunk size responses are padded to.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Drop anything queued.
    pub fn clear(&mut self) {
        self.len = 0;
        self.pos = 0;
    }

    /// Whether every queued byte has been handed to the bus.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.len
    }

    /// The queued bytes not yet handed to the bus.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.pos..self.len]
    }

    /// Copy the next bytes to send into `out`, filling any remainder with
    /// filler bytes.
    pub fn next_chunk(&mut self, out: &mut [u8]) {
        let count = out.len().min(self.len - self.pos);

        out[..count].copy_from_slice(&self.buffer[self.pos..self.pos + count]);
        out[count..].fill(FILLER);
        self.pos += count;
    }

    /// Replace the queue with a status response: NCR filler, the R1 token and
    /// the extra bytes.
    pub fn encode_status(&mut self, token: R1Response, extra: &[u8]) {
        debug_assert!(RESPONSE_DELAY + 1 + extra.len() <= DATA_BLOCK_LEN);

        self.buffer[..RESPONSE_DELAY].fill(FILLER);
        self.buffer[RESPONSE_DELAY] = token.0;
        let end = RESPONSE_DELAY + 1 + extra.len();
        self.buffer[RESPONSE_DELAY + 1..end].copy_from_slice(extra);

        self.finish(end);
    }

    /// Replace the queue with `response`.
    pub fn encode_response(&mut self, response: &Response) {
        self.encode_status(response.token(), response.extra());
    }

    /// Replace the queue with a data block: NAC filler, the Start Block token,
    /// the payload and the CRC16 of the payload.
    pub fn encode_data_block(&mut self, payload: &[u8]) {
        debug_assert!(payload.len() <= BLOCK_SIZE);

        let start = DATA_DELAY + 1;
        let end = start + payload.len();

        self.buffer[..DATA_DELAY].fill(FILLER);
        self.buffer[DATA_DELAY] = DATA_START_BLOCK;
        self.buffer[start..end].copy_from_slice(payload);
        self.buffer[end..end + 2].copy_from_slice(&checksum::crc16(payload).to_be_bytes());

        self.finish(end + 2);
    }

    fn finish(&mut self, used: usize) {
        let padded = used.div_ceil(self.chunk_size) * self.chunk_size;

        self.buffer[used..padded].fill(FILLER);
        self.len = padded;
        self.pos = 0;
    }
}

const fn clamp_chunk(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        1
    } else if chunk_size > MAX_CHUNK_SIZE {
        MAX_CHUNK_SIZE
    } else {
        chunk_size
    }
}

/// A data block found in bytes received from the card.
#[derive(Debug, PartialEq)]
pub struct DataBlock<'a> {
    /// The block contents.
    pub payload: &'a [u8],

    /// The CRC16 that followed the payload.
    pub crc: u16,
}

impl DataBlock<'_> {
    /// Whether the trailing CRC16 matches the payload.
    pub fn crc_valid(&self) -> bool {
        checksum::crc16(self.payload) == self.crc
    }
}

/// Find a data block of `len` payload bytes the way a host does: skip filler
/// up to the Start Block token.
///
/// Returns the block and the number of bytes consumed, or `None` if there is
/// no token or the block is incomplete.
pub fn parse_data_block(bytes: &[u8], len: usize) -> Option<(DataBlock<'_>, usize)> {
    let start = bytes.iter().position(|&b| b != FILLER)?;
    if bytes[start] != DATA_START_BLOCK {
        return None;
    }

    let payload = bytes.get(start + 1..start + 1 + len)?;
    let crc = bytes.get(start + 1 + len..start + 3 + len)?;

    let block = DataBlock {
        payload,
        crc: u16::from_be_bytes([crc[0], crc[1]]),
    };

    Some((block, start + 3 + len))
}
