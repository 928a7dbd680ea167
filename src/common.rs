// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! Constants from the SD Simplified Specification that are used in more than
//! one module.

/// The size of a data block (and of a storage sector) in bytes.
///
/// The emulated card is block addressed, so this is also the unit of the
/// READ_SINGLE_BLOCK and READ_MULTIPLE_BLOCK arguments.
pub const BLOCK_SIZE: usize = 512;

/// The size of the CID and CSD registers in bytes.
pub const REGISTER_SIZE: usize = 16;

/// The size of a command frame in bytes (see Table 7-1).
pub const FRAME_LEN: usize = 6;

/// The value the card drives on the bus when it has nothing to say.
pub const FILLER: u8 = 0xff;

/// Start Block token for a single or multiple block read (section 7.3.3.2).
pub const DATA_START_BLOCK: u8 = 0xfe;

/// Voltage accepted nibble for 2.7-3.6 V.
///
/// This is the only range the emulated card supports. It is the VHS value a
/// host sends in SEND_IF_COND and the voltage window advertised in the OCR.
pub const VOLTAGE_2_7_TO_3_6: u8 = 0b0001;

/// The card capacity classification from section 3.3.2.
///
/// Note that Ultra Capacity (SDUC) cards are not supported in SPI mode
/// (see section 7.1) so there is no entry for them here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CardCapacity {
    /// SDSC card
    Standard,

    /// SDHC or SDXC card
    HighOrExtended,
}
