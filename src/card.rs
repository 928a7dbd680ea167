// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! The command and mode state machine of the emulated card.
//!
//! [`Card::execute`] maps one command frame to a [`Response`] and a change of
//! [`Session`] state. Commands that start a data phase (SEND_CID, SEND_CSD,
//! READ_SINGLE_BLOCK, READ_MULTIPLE_BLOCK) only answer with R1; the data
//! itself is pulled afterwards, one block at a time, with
//! [`Card::next_transfer`].
//!
//! The card is read only. Every write and erase command is refused with
//! ERASE_RESET and a write protect status, and storage is never touched.

use log::{debug, warn};

use crate::{
    cmds::{AppCmd, Cmd, CommandFrame},
    common::{CardCapacity, REGISTER_SIZE},
    regs::Registers,
    resp::{if_cond_payload, R1Response, R2Status, Response, OCR},
};

/// `remaining_blocks_to_read` for READ_MULTIPLE_BLOCK: read until stopped.
pub const UNBOUNDED: u32 = u32::MAX;

/// What the card owes the host after its last R1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Nothing.
    Idle,

    /// The CID register as a data block.
    SendCid,

    /// The CSD register as a data block.
    SendCsd,

    /// One or more blocks from storage.
    ReadBlock,
}

/// The mutable state of one emulated card session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// The current response obligation.
    pub mode: Mode,

    /// The last command was APP_CMD.
    pub app_command_pending: bool,

    /// The host turned CRC checking on with CRC_ON_OFF.
    pub crc_checking_enabled: bool,

    /// The host set HCS in SD_SEND_OP_COND.
    pub high_capacity_flag: bool,

    /// The status byte returned by SEND_STATUS.
    pub status_register: R2Status,

    /// The next block to read.
    pub current_block_index: u32,

    /// Blocks left in the current read; [`UNBOUNDED`] for a multiple block
    /// read.
    pub remaining_blocks_to_read: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            app_command_pending: false,
            crc_checking_enabled: false,
            high_capacity_flag: false,
            status_register: R2Status::READY,
            current_block_index: 0,
            remaining_blocks_to_read: 0,
        }
    }
}

/// The next piece of data the card owes the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transfer {
    /// No data phase is pending.
    None,

    /// A register, sent as a 16 byte data block.
    Register([u8; REGISTER_SIZE]),

    /// The storage sector to send as a 512 byte data block.
    Block(u32),
}

/// The emulated card: its registers and session.
#[derive(Debug, Clone)]
pub struct Card {
    session: Session,
    registers: Registers,
    enforce_crc: bool,
}

impl Card {
    /// A card in its initial state.
    ///
    /// With `enforce_crc` every frame is CRC checked. Without it only CMD0,
    /// CMD8 and frames received while CRC checking is on are.
    pub fn new(registers: Registers, enforce_crc: bool) -> Self {
        Self {
            session: Session::default(),
            registers,
            enforce_crc,
        }
    }

    /// The current session state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The CID and CSD registers.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Return the session to its initial state.
    pub fn reset(&mut self) {
        self.session = Session::default();
    }

    /// The capacity the host announced in SD_SEND_OP_COND.
    pub fn host_capacity(&self) -> CardCapacity {
        if self.session.high_capacity_flag {
            CardCapacity::HighOrExtended
        } else {
            CardCapacity::Standard
        }
    }

    /// Whether a data phase is waiting for [`Card::next_transfer`].
    pub fn has_pending_transfer(&self) -> bool {
        self.session.mode != Mode::Idle
    }

    /// Handle one command frame.
    ///
    /// Returns `None` if the frame is dropped: a CRC failure while a data
    /// phase is pending is left for the host to retransmit and changes
    /// nothing.
    pub fn execute(&mut self, frame: &CommandFrame) -> Option<Response> {
        let crc_ok = !self.crc_required(frame) || frame.crc_valid();

        debug!(
            "CMD{} arg {:#010x} crc ok {} mode {:?}",
            frame.index(),
            frame.arg(),
            crc_ok,
            self.session.mode
        );

        if !crc_ok && self.session.mode != Mode::Idle {
            return None;
        }

        let app_command = core::mem::replace(&mut self.session.app_command_pending, false);

        let response = if !crc_ok {
            Response::new(R1Response::COM_CRC_ERROR)
        } else if app_command {
            self.execute_app(frame)
        } else {
            self.execute_cmd(frame)
        };

        Some(response)
    }

    /// Advance the data phase and say what to send next.
    ///
    /// Registers are sent once and return the card to idle. Blocks are
    /// counted down; the card returns to idle after the last one, or at once
    /// if the next block is beyond the end of storage.
    pub fn next_transfer(&mut self) -> Transfer {
        let session = &mut self.session;

        match session.mode {
            Mode::Idle => Transfer::None,
            Mode::SendCid => {
                session.mode = Mode::Idle;
                Transfer::Register(*self.registers.cid.as_bytes())
            }
            Mode::SendCsd => {
                session.mode = Mode::Idle;
                Transfer::Register(*self.registers.csd.as_bytes())
            }
            Mode::ReadBlock if session.remaining_blocks_to_read == 0 => {
                session.mode = Mode::Idle;
                Transfer::None
            }
            Mode::ReadBlock => {
                let index = session.current_block_index;

                if index >= self.registers.capacity_sectors {
                    warn!("block {} is out of range", index);
                    session.status_register = R2Status::OUT_OF_RANGE;
                    session.mode = Mode::Idle;
                    session.remaining_blocks_to_read = 0;
                    return Transfer::None;
                }

                if session.remaining_blocks_to_read != UNBOUNDED {
                    session.remaining_blocks_to_read -= 1;
                }
                if session.remaining_blocks_to_read == 0 {
                    session.mode = Mode::Idle;
                }
                session.current_block_index = index.saturating_add(1);

                Transfer::Block(index)
            }
        }
    }

    /// Abort the current read after storage failed to produce a block.
    pub fn block_read_failed(&mut self) {
        self.session.status_register = R2Status::ERROR;
        self.session.mode = Mode::Idle;
        self.session.remaining_blocks_to_read = 0;
    }

    fn crc_required(&self, frame: &CommandFrame) -> bool {
        // CMD0 and CMD8 carry a valid CRC even when SPI mode CRC checking
        // is off (section 7.2.2).
        self.enforce_crc
            || self.session.crc_checking_enabled
            || matches!(
                Cmd::from_index(frame.index()),
                Some(Cmd::GoIdleState | Cmd::SendIfCond)
            )
    }

    fn execute_cmd(&mut self, frame: &CommandFrame) -> Response {
        let session = &mut self.session;
        let arg = frame.arg();

        match Cmd::from_index(frame.index()) {
            Some(Cmd::GoIdleState) => {
                session.status_register = R2Status::READY;
                Response::new(R1Response::IDLE)
            }
            Some(Cmd::SendIfCond) => {
                session.status_register = R2Status::READY;
                Response::with_payload(R1Response::READY, if_cond_payload(arg))
            }
            Some(Cmd::SendCSD) => {
                self.start_register(Mode::SendCsd);
                Response::new(R1Response::READY)
            }
            Some(Cmd::SendCID) => {
                self.start_register(Mode::SendCid);
                Response::new(R1Response::READY)
            }
            Some(Cmd::StopTransmisson) => {
                session.mode = Mode::Idle;
                session.remaining_blocks_to_read = 0;
                session.status_register = R2Status::READY;
                Response::new(R1Response::READY)
            }
            Some(Cmd::SendStatus) => Response::with_status(R1Response::READY, session.status_register),
            Some(Cmd::ReadSingleBlock) => self.start_read(arg, 1),
            Some(Cmd::ReadMultipleBlock) => self.start_read(arg, UNBOUNDED),
            Some(
                Cmd::WriteBlock
                | Cmd::WriteMultipleBlock
                | Cmd::EraseWrBlkStartAddr
                | Cmd::EraseWrBlkEndAddr
                | Cmd::Erase,
            ) => self.refuse_write(),
            Some(Cmd::AppCmd) => {
                session.app_command_pending = true;
                Response::new(R1Response::READY)
            }
            Some(Cmd::ReadOCR) => Response::with_payload(R1Response::READY, OCR.to_be_bytes()),
            Some(Cmd::CRCOnOff) => {
                session.crc_checking_enabled = arg != 0;
                Response::new(R1Response::READY)
            }
            _ => Response::new(R1Response::ILLEGAL_COMMAND),
        }
    }

    fn execute_app(&mut self, frame: &CommandFrame) -> Response {
        const HCS_BIT: u32 = 0b0100_0000_0000_0000_0000_0000_0000_0000;

        match AppCmd::from_index(frame.index()) {
            Some(AppCmd::SetWrBlkEraseCount) => self.refuse_write(),
            Some(AppCmd::SdSendOpCond) => {
                self.session.high_capacity_flag = frame.arg() & HCS_BIT != 0;
                self.session.status_register = R2Status::READY;
                Response::new(R1Response::READY)
            }
            _ => Response::new(R1Response::ILLEGAL_COMMAND),
        }
    }

    fn start_register(&mut self, mode: Mode) {
        self.session.mode = mode;
        self.session.remaining_blocks_to_read = 0;
        self.session.status_register = R2Status::READY;
    }

    fn start_read(&mut self, index: u32, count: u32) -> Response {
        let session = &mut self.session;

        if index >= self.registers.capacity_sectors {
            warn!("read of block {} is out of range", index);
            session.mode = Mode::Idle;
            session.remaining_blocks_to_read = 0;
            session.status_register = R2Status::OUT_OF_RANGE;
            return Response::new(R1Response::ADDRESS_ERROR);
        }

        session.mode = Mode::ReadBlock;
        session.remaining_blocks_to_read = count;
        session.current_block_index = index;
        session.status_register = R2Status::READY;
        Response::new(R1Response::READY)
    }

    fn refuse_write(&mut self) -> Response {
        self.session.status_register = R2Status::WP_VIOLATION | R2Status::WRITE_PROTECTED;
        Response::new(R1Response::ERASE_RESET)
    }
}
