// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! The two checksums used on the SD Card bus.
//!
//! Command frames and the CID/CSD registers are protected by a 7-bit CRC
//! (section 4.5 of the Simplified Specification). Data blocks are protected
//! by a 16-bit CRC with polynomial x^16 + x^12 + x^5 + 1 and an all ones
//! initial value, which the CRC catalogue calls CRC-16/IBM-3740 (better known
//! as CRC-16/CCITT-FALSE).

use crc::{Crc, CRC_16_IBM_3740, CRC_7_MMC};

const CRC7: Crc<u8> = Crc::<u8>::new(&CRC_7_MMC);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC7 of `bytes` as it appears on the wire.
///
/// The 7 CRC bits occupy bits 7..1 and bit 0 is the end bit, which is always
/// set. This is the form of the last byte of a command frame and of the last
/// byte of the CID and CSD registers.
pub fn crc7(bytes: &[u8]) -> u8 {
    (CRC7.checksum(bytes) << 1) | 1
}

/// Compute the CRC16 that trails a data block.
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc7_of_go_idle_is_0x95() {
        // Section 7.2.2 gives 0x95 as the last byte of GoIdleState.
        assert_eq!(crc7(&[0x40, 0x00, 0x00, 0x00, 0x00]), 0x95);
    }

    #[test]
    fn crc7_of_send_if_cond_is_0x87() {
        assert_eq!(crc7(&[0x48, 0x00, 0x00, 0x01, 0xaa]), 0x87);
    }

    #[test]
    fn crc7_of_real_csd_matches_stored_crc() {
        // A CSD read from a real card, with its stored CRC as the last byte.
        let csd = [
            0x00, 0x26, 0x00, 0x32, 0x5f, 0x59, 0x83, 0xc8, 0xad, 0xdb, 0xcf, 0xff, 0xd2, 0x40,
            0x40,
        ];

        assert_eq!(crc7(&csd), 0xa5);
    }

    #[test]
    fn crc16_of_check_string_is_0x29b1() {
        assert_eq!(crc16(b"123456789"), 0x29b1);
    }

    #[test]
    fn crc16_of_csd_block() {
        let block = [
            0x00, 0x26, 0x00, 0x32, 0x5f, 0x5a, 0x83, 0xae, 0xfe, 0xfb, 0xcf, 0xff, 0x92, 0x80,
            0x40, 0xdf,
        ];

        assert_eq!(crc16(&block), 0xf5cf);
    }

    #[test]
    fn crc16_of_zero_block_is_not_zero() {
        assert_eq!(crc16(&[0; 512]), 0x1634);
    }
}
