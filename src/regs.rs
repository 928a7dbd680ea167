// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! The CID and CSD registers of the emulated card.
//!
//! Both registers are 16 byte records whose fields are packed across byte
//! boundaries (sections 5.2 and 5.3.3 of the Simplified Specification). They
//! are built as explicit byte arrays with shift and mask accessors so the
//! layout on the wire never depends on how the compiler lays out a struct.
//! The last byte of each register holds its CRC7, computed over the first
//! 15 bytes after every other field has been written.

use crate::{
    checksum,
    common::{BLOCK_SIZE, REGISTER_SIZE},
};

/// Card Identification register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cid([u8; REGISTER_SIZE]);

/// Card Specific Data register, version 2.0 (block addressed).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Csd([u8; REGISTER_SIZE]);

/// The registers of one emulated card, built once from the storage capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct Registers {
    /// The identification register.
    pub cid: Cid,

    /// The specification register.
    pub csd: Csd,

    /// The number of addressable 512 byte blocks.
    pub capacity_sectors: u32,
}

// Static CID contents. The manufacturer, OEM and product are the ones the
// card has always identified itself with; hosts only display them.
const CID_MANUFACTURER_ID: u8 = 0x01;
const CID_OEM_ID: [u8; 2] = *b"PA";
const CID_PRODUCT_NAME: [u8; 5] = *b"ESP3D";
const CID_REVISION: (u8, u8) = (1, 0);
const CID_SERIAL_NUMBER: u32 = 0x1234_5678;
const CID_MANUFACTURE_YEAR: u16 = 2022;
const CID_MANUFACTURE_MONTH: u8 = 10;

// CSD version 2.0 template (Table 5-16). The C_SIZE bytes (7..10) and the
// CRC byte are filled in by build_csd.
const CSD_TEMPLATE: [u8; REGISTER_SIZE] = [
    0b0100_0000, // CSD_STRUCTURE = 1 (version 2.0)
    0x0e,        // TAAC = 1.0 ms
    0x00,        // NSAC
    0x32,        // TRAN_SPEED = 25 MHz
    0x5b,        // CCC[11:4]
    0x59,        // CCC[3:0], READ_BL_LEN = 9 (512 bytes)
    0x00,        // READ_BL_PARTIAL, WRITE_BLK_MISALIGN, READ_BLK_MISALIGN, DSR_IMP
    0x00,        // C_SIZE[21:16]
    0x00,        // C_SIZE[15:8]
    0x00,        // C_SIZE[7:0]
    0x7f,        // ERASE_BLK_EN = 1, SECTOR_SIZE[6:1]
    0x80,        // SECTOR_SIZE[0], WP_GRP_SIZE
    0x0a,        // WP_GRP_ENABLE, R2W_FACTOR = 2, WRITE_BL_LEN[3:2]
    0x40,        // WRITE_BL_LEN[1:0], WRITE_BL_PARTIAL
    0x00,        // FILE_FORMAT_GRP, COPY, PERM/TMP_WRITE_PROTECT, FILE_FORMAT
    0x00,        // CRC
];

/// The largest value the 22 bit C_SIZE field can hold.
pub const MAX_DEVICE_SIZE: u32 = (1 << 22) - 1;

/// Build the CID register from the static defaults and stamp its CRC.
pub fn build_cid() -> Cid {
    let mut data = [0; REGISTER_SIZE];
    let year = CID_MANUFACTURE_YEAR - 2000;

    data[0] = CID_MANUFACTURER_ID;
    data[1..3].copy_from_slice(&CID_OEM_ID);
    data[3..8].copy_from_slice(&CID_PRODUCT_NAME);
    data[8] = (CID_REVISION.0 << 4) | CID_REVISION.1;
    data[9..13].copy_from_slice(&CID_SERIAL_NUMBER.to_be_bytes());
    data[13] = ((year >> 4) & 0x0f) as u8;
    data[14] = (((year & 0x0f) as u8) << 4) | (CID_MANUFACTURE_MONTH & 0x0f);

    Cid(seal(data))
}

/// Build the CSD register for a device of `capacity_sectors` blocks.
///
/// C_SIZE is written as `capacity_sectors - 1`, saturating at zero and
/// clamped to [`MAX_DEVICE_SIZE`].
pub fn build_csd(capacity_sectors: u64) -> Csd {
    let mut data = CSD_TEMPLATE;
    let device_size = capacity_sectors
        .saturating_sub(1)
        .min(u64::from(MAX_DEVICE_SIZE)) as u32;

    data[7] = ((device_size >> 16) & 0x3f) as u8;
    data[8] = (device_size >> 8) as u8;
    data[9] = device_size as u8;

    Csd(seal(data))
}

fn seal(mut data: [u8; REGISTER_SIZE]) -> [u8; REGISTER_SIZE] {
    data[REGISTER_SIZE - 1] = checksum::crc7(&data[..REGISTER_SIZE - 1]);
    data
}

impl Cid {
    /// The register as it is sent on the wire.
    pub fn as_bytes(&self) -> &[u8; REGISTER_SIZE] {
        &self.0
    }

    /// MID
    pub fn manufacturer_id(&self) -> u8 {
        self.0[0]
    }

    /// OID, two ASCII characters.
    pub fn oem_id(&self) -> [u8; 2] {
        [self.0[1], self.0[2]]
    }

    /// PNM, five ASCII characters.
    pub fn product_name(&self) -> [u8; 5] {
        [self.0[3], self.0[4], self.0[5], self.0[6], self.0[7]]
    }

    /// PRV as (major, minor).
    pub fn revision(&self) -> (u8, u8) {
        (self.0[8] >> 4, self.0[8] & 0x0f)
    }

    /// PSN
    pub fn serial_number(&self) -> u32 {
        u32::from_be_bytes([self.0[9], self.0[10], self.0[11], self.0[12]])
    }

    /// MDT as (year, month).
    pub fn manufacture_date(&self) -> (u16, u8) {
        let year = (u16::from(self.0[13] & 0x0f) << 4) | u16::from(self.0[14] >> 4);
        (2000 + year, self.0[14] & 0x0f)
    }

    /// The CRC byte, including the end bit.
    pub fn crc(&self) -> u8 {
        self.0[15]
    }
}

impl Csd {
    /// The register as it is sent on the wire.
    pub fn as_bytes(&self) -> &[u8; REGISTER_SIZE] {
        &self.0
    }

    /// CSD_STRUCTURE (1 means version 2.0).
    pub fn version(&self) -> u8 {
        self.0[0] >> 6
    }

    /// READ_BL_LEN as a power of two.
    pub fn read_block_length(&self) -> u8 {
        self.0[5] & 0x0f
    }

    /// The 22 bit C_SIZE field.
    pub fn device_size(&self) -> u32 {
        (u32::from(self.0[7] & 0x3f) << 16) | (u32::from(self.0[8]) << 8) | u32::from(self.0[9])
    }

    /// The number of blocks this register advertises.
    pub fn capacity_sectors(&self) -> u64 {
        u64::from(self.device_size()) + 1
    }

    /// The CRC byte, including the end bit.
    pub fn crc(&self) -> u8 {
        self.0[15]
    }
}

impl Registers {
    /// Build both registers for a device of `capacity_bytes` bytes.
    ///
    /// The range check capacity saturates at `u32::MAX` blocks, which is the
    /// most a 32 bit block address can reach anyway.
    pub fn new(capacity_bytes: u64) -> Self {
        let sectors = capacity_bytes / BLOCK_SIZE as u64;

        Self {
            cid: build_cid(),
            csd: build_csd(sectors),
            capacity_sectors: u32::try_from(sectors).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_has_expected_bytes() {
        let cid = build_cid();

        assert_eq!(
            cid.as_bytes()[..15],
            [
                0x01, b'P', b'A', b'E', b'S', b'P', b'3', b'D', 0x10, 0x12, 0x34, 0x56, 0x78, 0x01,
                0x6a
            ]
        );
    }

    #[test]
    fn cid_fields_decode() {
        let cid = build_cid();

        assert_eq!(cid.manufacturer_id(), 0x01);
        assert_eq!(&cid.oem_id(), b"PA");
        assert_eq!(&cid.product_name(), b"ESP3D");
        assert_eq!(cid.revision(), (1, 0));
        assert_eq!(cid.serial_number(), 0x1234_5678);
        assert_eq!(cid.manufacture_date(), (2022, 10));
    }

    #[test]
    fn cid_crc_covers_first_15_bytes() {
        let cid = build_cid();

        assert_eq!(cid.crc(), checksum::crc7(&cid.as_bytes()[..15]));
        assert_eq!(cid.crc() & 1, 1, "end bit not set");
    }

    #[test]
    fn csd_template_fields() {
        let csd = build_csd(1);

        assert_eq!(csd.version(), 1);
        assert_eq!(csd.read_block_length(), 9);
        assert_eq!(csd.as_bytes()[3], 0x32);
        assert_eq!(csd.as_bytes()[10..15], [0x7f, 0x80, 0x0a, 0x40, 0x00]);
    }

    #[test]
    fn csd_device_size_is_capacity_minus_one() {
        let csd = build_csd(1_000_000);

        assert_eq!(csd.device_size(), 999_999);
        assert_eq!(csd.capacity_sectors(), 1_000_000);
    }

    #[test]
    fn csd_device_size_bit_positions() {
        let csd = build_csd(u64::from(MAX_DEVICE_SIZE) + 1);

        assert_eq!(csd.as_bytes()[7], 0x3f);
        assert_eq!(csd.as_bytes()[8], 0xff);
        assert_eq!(csd.as_bytes()[9], 0xff);

        let csd = build_csd(0x12_3457);

        assert_eq!(csd.as_bytes()[7], 0x12);
        assert_eq!(csd.as_bytes()[8], 0x34);
        assert_eq!(csd.as_bytes()[9], 0x56);
    }

    #[test]
    fn csd_device_size_saturates() {
        assert_eq!(build_csd(0).device_size(), 0);
        assert_eq!(build_csd(u64::MAX).device_size(), MAX_DEVICE_SIZE);
    }

    #[test]
    fn csd_crc_is_computed_after_capacity() {
        let small = build_csd(8);
        let large = build_csd(1_000_000);

        assert_ne!(small.crc(), large.crc());
        assert_eq!(large.crc(), checksum::crc7(&large.as_bytes()[..15]));
    }

    #[test]
    fn registers_capacity_is_in_sectors() {
        let regs = Registers::new(1_000_000 * 512);

        assert_eq!(regs.capacity_sectors, 1_000_000);
        assert_eq!(regs.csd.device_size(), 999_999);
    }

    #[test]
    fn registers_capacity_saturates_at_u32() {
        let regs = Registers::new(u64::MAX);

        assert_eq!(regs.capacity_sectors, u32::MAX);
    }
}
