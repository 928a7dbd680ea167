// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! SD Card commands and app commands, and the frames that carry them.
//!
//! The card side of the bus never knows where a command starts: the host
//! clocks bytes in fixed size chunks and a 6 byte frame can begin anywhere in
//! a chunk and end in the next one. [`RxWindow`] collects received bytes until
//! a complete frame is visible.

use crate::{
    checksum,
    common::{FILLER, FRAME_LEN},
    config::MAX_CHUNK_SIZE,
};

/// The commands an SD Card accepts in SPI mode, including the ones the
/// emulated card refuses. This is taken from Table 7-3 of the Simplifed
/// Specification.
#[allow(missing_docs)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cmd {
    GoIdleState = 0,
    SendOpCond = 1,
    SwitchFunc = 6,
    SendIfCond = 8,
    SendCSD = 9,
    SendCID = 10,
    StopTransmisson = 12,
    SendStatus = 13,
    SetBlockLen = 16,
    ReadSingleBlock = 17,
    ReadMultipleBlock = 18,
    WriteBlock = 24,
    WriteMultipleBlock = 25,
    ProgramCSD = 27,
    SetWriteProt = 28,
    ClrWriteProt = 29,
    SendWriteProt = 30,
    EraseWrBlkStartAddr = 32,
    EraseWrBlkEndAddr = 33,
    Erase = 38,
    LockUnlock = 42,
    AppCmd = 55,
    GenCmd = 56,
    ReadOCR = 58,
    CRCOnOff = 59,
}

/// The application specific commands an SD Card accepts in SPI mode. This is
/// taken from Table 7-4 of the Simplifed Specification.
#[allow(missing_docs)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppCmd {
    SdStatus = 13,
    SendNumWrBlocks = 22,
    SetWrBlkEraseCount = 23,
    SdSendOpCond = 41,
    SetClrCardDetect = 42,
    SendSCR = 51,
}

impl Cmd {
    /// Look up a command by its 6 bit index.
    pub fn from_index(index: u8) -> Option<Cmd> {
        use Cmd::*;

        let cmd = match index {
            0 => GoIdleState,
            1 => SendOpCond,
            6 => SwitchFunc,
            8 => SendIfCond,
            9 => SendCSD,
            10 => SendCID,
            12 => StopTransmisson,
            13 => SendStatus,
            16 => SetBlockLen,
            17 => ReadSingleBlock,
            18 => ReadMultipleBlock,
            24 => WriteBlock,
            25 => WriteMultipleBlock,
            27 => ProgramCSD,
            28 => SetWriteProt,
            29 => ClrWriteProt,
            30 => SendWriteProt,
            32 => EraseWrBlkStartAddr,
            33 => EraseWrBlkEndAddr,
            38 => Erase,
            42 => LockUnlock,
            55 => AppCmd,
            56 => GenCmd,
            58 => ReadOCR,
            59 => CRCOnOff,
            _ => return None,
        };

        Some(cmd)
    }
}

impl AppCmd {
    /// Look up an app command by its 6 bit index.
    pub fn from_index(index: u8) -> Option<AppCmd> {
        use AppCmd::*;

        let cmd = match index {
            13 => SdStatus,
            22 => SendNumWrBlocks,
            23 => SetWrBlkEraseCount,
            41 => SdSendOpCond,
            42 => SetClrCardDetect,
            51 => SendSCR,
            _ => return None,
        };

        Some(cmd)
    }
}

/// Encoding of a command into a frame, as a host would send it.
pub trait Encode: Sized + Copy {
    /// The 6 bit command index.
    fn index(self) -> u8;

    /// Build the frame for this command with a correct CRC7.
    fn frame(self, arg: u32) -> CommandFrame {
        CommandFrame::new(self.index(), arg)
    }
}

impl Encode for Cmd {
    fn index(self) -> u8 {
        self as u8
    }
}

impl Encode for AppCmd {
    fn index(self) -> u8 {
        self as u8
    }
}

/// One 6 byte command frame (Table 7-1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandFrame {
    bytes: [u8; FRAME_LEN],
}

impl CommandFrame {
    /// Encode a frame for the command `index` with a correct CRC7.
    pub fn new(index: u8, arg: u32) -> Self {
        let mut bytes = [0; FRAME_LEN];

        bytes[0] = (index & CMD_INDEX_MASK) | CMD_START;
        bytes[1..5].copy_from_slice(&arg.to_be_bytes());
        bytes[5] = checksum::crc7(&bytes[..5]);

        Self { bytes }
    }

    /// Wrap 6 received bytes without checking them.
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    /// The frame as it is sent on the wire.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// The 6 bit command index.
    pub fn index(&self) -> u8 {
        self.bytes[0] & CMD_INDEX_MASK
    }

    /// The 32 bit argument (sent big endian).
    pub fn arg(&self) -> u32 {
        u32::from_be_bytes([self.bytes[1], self.bytes[2], self.bytes[3], self.bytes[4]])
    }

    /// The received CRC byte, including the end bit.
    pub fn crc(&self) -> u8 {
        self.bytes[5]
    }

    /// Whether the CRC byte matches the rest of the frame.
    pub fn crc_valid(&self) -> bool {
        verify_crc7(&self.bytes)
    }
}

/// Check the CRC7 over the command and argument bytes against the trailing
/// CRC byte.
pub fn verify_crc7(frame: &[u8; FRAME_LEN]) -> bool {
    checksum::crc7(&frame[..5]) == frame[5]
}

/// Find the first byte that has the start and transmission bits of a command.
pub fn find_command_start(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b & CMD_START_MASK == CMD_START)
}

/// Extract the first command frame in `bytes`.
///
/// Returns `None` if there is no start byte or if fewer than 6 bytes follow
/// it; the caller should wait for more bytes.
pub fn try_parse_command(bytes: &[u8]) -> Option<CommandFrame> {
    let start = find_command_start(bytes)?;
    let frame = bytes.get(start..start + FRAME_LEN)?;
    let mut buffer = [0; FRAME_LEN];

    buffer.copy_from_slice(frame);

    Some(CommandFrame::from_bytes(buffer))
}

const RX_WINDOW_SIZE: usize = 2 * MAX_CHUNK_SIZE;

/// Bytes received from the host that have not yet been consumed as a frame.
#[derive(Debug)]
pub struct RxWindow {
    buffer: [u8; RX_WINDOW_SIZE],
    len: usize,
}

impl Default for RxWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl RxWindow {
    /// An empty window.
    pub const fn new() -> Self {
        Self {
            buffer: [FILLER; RX_WINDOW_SIZE],
            len: 0,
        }
    }

    /// The number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append received bytes, dropping the oldest ones on overflow.
    pub fn push(&mut self, bytes: &[u8]) {
        let bytes = &bytes[bytes.len().saturating_sub(RX_WINDOW_SIZE)..];
        let overflow = (self.len + bytes.len()).saturating_sub(RX_WINDOW_SIZE);

        self.discard(overflow);
        self.buffer[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Remove and return the next complete frame.
    ///
    /// Bytes before the start of a frame are discarded. A frame that is not
    /// complete yet stays buffered.
    pub fn take_command(&mut self) -> Option<CommandFrame> {
        match find_command_start(&self.buffer[..self.len]) {
            None => {
                self.len = 0;
                None
            }
            Some(start) => {
                self.discard(start);
                let frame = try_parse_command(&self.buffer[..self.len])?;
                self.discard(FRAME_LEN);
                Some(frame)
            }
        }
    }

    fn discard(&mut self, count: usize) {
        let count = count.min(self.len);

        self.buffer.copy_within(count..self.len, 0);
        self.len -= count;
    }
}

// This is a start bit (0) followed by the transmission from host bit (see
// Table 7-1 in the Simplifed Specification).
const CMD_START: u8 = 0b0100_0000;
const CMD_START_MASK: u8 = 0b1100_0000;
const CMD_INDEX_MASK: u8 = 0b0011_1111;
