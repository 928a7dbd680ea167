// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! A read only SD Card emulated over SPI in slave mode.
//!
//! [`SdProxy`] answers an SD host's SPI mode commands from a fixed CID, a CSD
//! derived from the storage capacity and the sectors of a [`SectorStorage`]
//! device. The host sees a high capacity card it can identify, query and read
//! from; writes and erases are refused.
//!
//! ```ignore
//! let proxy = SdProxy::new(ReadStorageDevice::new(flash));
//! proxy.initialize(SpiSlave::new(spi), Config::default());
//! proxy.start();
//! spawner.spawn(proxy_task(&proxy));
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod card;
pub mod checksum;
pub mod cmds;
pub mod common;
pub mod config;
pub mod proxy;
pub mod regs;
pub mod resp;
pub mod storage;
pub mod transport;

#[cfg(test)]
mod testutils;

pub use card::{Card, Mode, Session};
pub use config::{Config, ConfigError};
pub use proxy::SdProxy;
pub use regs::{Cid, Csd, Registers};
pub use storage::{ReadStorageDevice, SectorStorage, StorageError};
pub use transport::{SpiSlave, Transport, TransportError};
