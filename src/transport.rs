// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! The bus between the host and the emulated card.
//!
//! The card never drives the clock: every exchange sends one chunk and
//! receives one chunk while the host clocks the bus, and it blocks until the
//! host has done so.

use embedded_hal::blocking::spi::Transfer;
use snafu::prelude::*;

use crate::config::Config;

/// A full duplex, chunked bus as seen from the card side.
pub trait Transport {
    /// The error returned by a failed exchange or claim.
    type Error: core::fmt::Debug;

    /// Take ownership of the bus for `config`.
    ///
    /// Called once by [`SdProxy::initialize`](crate::SdProxy::initialize).
    fn claim(&mut self, _config: &Config) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Give the bus back. Called on teardown.
    fn release(&mut self) {}

    /// Send `tx` while receiving into `rx` (both one chunk long).
    ///
    /// Returns the number of bytes actually exchanged.
    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<usize, Self::Error>;
}

/// The error type for [`SpiSlave`] exchanges.
#[derive(Debug, PartialEq, Snafu)]
pub enum TransportError {
    /// The SPI peripheral failed the transfer.
    #[snafu(display("Unable to transfer to and from SPI."))]
    SpiTransfer,
}

/// A [`Transport`] over an `embedded-hal` SPI peripheral in slave mode.
///
/// The transfer is done in place: the outgoing chunk is copied into the
/// receive buffer and the peripheral overwrites it with what the host sent.
#[derive(Debug)]
pub struct SpiSlave<SPI> {
    spi: SPI,
}

impl<SPI: Transfer<u8>> SpiSlave<SPI> {
    /// Wrap `spi`.
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    /// Give the peripheral back.
    pub fn into_inner(self) -> SPI {
        self.spi
    }
}

impl<SPI: Transfer<u8>> Transport for SpiSlave<SPI> {
    type Error = TransportError;

    fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<usize, Self::Error> {
        let len = tx.len().min(rx.len());
        let words = &mut rx[..len];

        words.copy_from_slice(&tx[..len]);
        let received = self
            .spi
            .transfer(words)
            .map_err(|_| SpiTransferSnafu {}.build())?
            .len();

        Ok(received)
    }
}

#[cfg(test)]
mod test {
    use embedded_hal_mock::spi;

    use super::*;
    use crate::testutils::StubSpi;

    #[test]
    fn exchange_sends_tx_and_returns_rx() {
        let expectations = [spi::Transaction::transfer(
            vec![0xff, 0xff, 0x01, 0xff],
            vec![0x40, 0x00, 0x00, 0x00],
        )];
        let mut slave = SpiSlave::new(spi::Mock::new(&expectations));
        let mut rx = [0; 4];

        let count = slave
            .exchange(&[0xff, 0xff, 0x01, 0xff], &mut rx)
            .expect("exchange failed");

        assert_eq!(count, 4);
        assert_eq!(rx, [0x40, 0x00, 0x00, 0x00]);
        slave.into_inner().done();
    }

    #[test]
    fn exchange_is_limited_to_shorter_buffer() {
        let expectations = [spi::Transaction::transfer(vec![1, 2], vec![3, 4])];
        let mut slave = SpiSlave::new(spi::Mock::new(&expectations));
        let mut rx = [0; 2];

        let count = slave.exchange(&[1, 2, 3, 4], &mut rx).expect("exchange failed");

        assert_eq!(count, 2);
        slave.into_inner().done();
    }

    #[test]
    fn exchange_maps_spi_error() {
        let mut slave = SpiSlave::new(StubSpi::failing());
        let mut rx = [0; 4];

        let result = slave.exchange(&[0; 4], &mut rx);

        assert_eq!(result, Err(TransportError::SpiTransfer));
    }

    #[test]
    fn default_claim_succeeds() {
        let mut slave = SpiSlave::new(StubSpi::default());

        assert_eq!(slave.claim(&Config::default()), Ok(()));
    }
}
