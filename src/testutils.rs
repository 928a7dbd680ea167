// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! Utilities to support tests.

use std::collections::VecDeque;

use embedded_hal::blocking::spi::Transfer;
use embedded_storage::ReadStorage;

use crate::{
    cmds::CommandFrame,
    common::{BLOCK_SIZE, FILLER},
    config::Config,
    storage::SectorStorage,
    transport::Transport,
};

#[derive(Debug, Default)]
pub struct StubSpi {
    fail: bool,
}

#[derive(Debug, PartialEq)]
pub struct StubError;

impl StubSpi {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Transfer<u8> for StubSpi {
    type Error = StubError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
        if self.fail {
            Err(StubError)
        } else {
            Ok(words)
        }
    }
}

/// The byte at `offset` of sector `index` in the test storage devices.
pub fn sector_byte(index: u32, offset: usize) -> u8 {
    (index as u8) ^ (offset as u8).rotate_left(3)
}

/// The whole of sector `index` in [`MemStorage`].
pub fn sector(index: u32) -> [u8; BLOCK_SIZE] {
    let mut out = [0; BLOCK_SIZE];
    for (offset, b) in out.iter_mut().enumerate() {
        *b = sector_byte(index, offset);
    }
    out
}

/// An `embedded-storage` device whose sector `i` is filled with `i`.
#[derive(Debug)]
pub struct MemDevice {
    sectors: usize,
}

impl MemDevice {
    pub fn new(sectors: usize) -> Self {
        Self { sectors }
    }
}

impl ReadStorage for MemDevice {
    type Error = StubError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        if offset + bytes.len() > self.capacity() {
            return Err(StubError);
        }

        for (i, b) in bytes.iter_mut().enumerate() {
            *b = ((offset + i) / BLOCK_SIZE) as u8;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.sectors * BLOCK_SIZE
    }
}

/// A [`SectorStorage`] that generates its contents and records every read.
#[derive(Debug)]
pub struct MemStorage {
    sectors: u64,
    ready: bool,
    failing_sector: Option<u32>,
    pub reads: Vec<u32>,
}

impl MemStorage {
    pub fn new(sectors: u64) -> Self {
        Self {
            sectors,
            ready: true,
            failing_sector: None,
            reads: Vec::new(),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            ready: false,
            ..Self::new(0)
        }
    }

    pub fn failing_at(mut self, index: u32) -> Self {
        self.failing_sector = Some(index);
        self
    }
}

impl SectorStorage for MemStorage {
    type Error = StubError;

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn capacity_bytes(&self) -> u64 {
        self.sectors * BLOCK_SIZE as u64
    }

    fn read_sector(&mut self, index: u32, out: &mut [u8; BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.reads.push(index);
        if self.failing_sector == Some(index) || u64::from(index) >= self.sectors {
            return Err(StubError);
        }

        *out = sector(index);
        Ok(())
    }
}

type Hook = Box<dyn FnMut(&[u8], &mut VecDeque<u8>)>;

/// A host on the other end of the bus.
///
/// Every exchange sends queued host bytes (or filler) and records what the
/// card sent. After `exchanges` exchanges it fails, which ends the bus
/// session. An optional hook sees everything received so far after each
/// exchange and may queue more host bytes.
pub struct FakeHost {
    outgoing: VecDeque<u8>,
    received: Vec<u8>,
    exchanges_left: usize,
    hook: Option<Hook>,
    refuse_claim: bool,
    pub claimed: Option<Config>,
    pub released: bool,
}

#[derive(Debug, PartialEq)]
pub enum HostError {
    Finished,
    Refused,
}

impl FakeHost {
    pub fn new(exchanges: usize) -> Self {
        Self {
            outgoing: VecDeque::new(),
            received: Vec::new(),
            exchanges_left: exchanges,
            hook: None,
            refuse_claim: false,
            claimed: None,
            released: false,
        }
    }

    pub fn refusing_claim() -> Self {
        Self {
            refuse_claim: true,
            ..Self::new(0)
        }
    }

    pub fn with_hook(mut self, hook: impl FnMut(&[u8], &mut VecDeque<u8>) + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn send(&mut self, frame: &CommandFrame) -> &mut Self {
        self.send_bytes(frame.as_bytes())
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.outgoing.extend(bytes);
        self
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }
}

impl Transport for FakeHost {
    type Error = HostError;

    fn claim(&mut self, config: &Config) -> Result<(), Self::Error> {
        if self.refuse_claim {
            return Err(HostError::Refused);
        }
        self.claimed = Some(*config);
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<usize, Self::Error> {
        if self.exchanges_left == 0 {
            return Err(HostError::Finished);
        }
        self.exchanges_left -= 1;

        self.received.extend_from_slice(tx);
        for b in rx.iter_mut() {
            *b = self.outgoing.pop_front().unwrap_or(FILLER);
        }

        if let Some(hook) = self.hook.as_mut() {
            hook(&self.received, &mut self.outgoing);
        }

        Ok(rx.len())
    }
}

/// Split off the first non-filler byte, the way a host waits for a token.
pub fn next_token(bytes: &[u8]) -> Option<(u8, &[u8])> {
    let start = bytes.iter().position(|&b| b != FILLER)?;
    Some((bytes[start], &bytes[start + 1..]))
}
