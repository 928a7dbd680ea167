// Copyright 2022 Steven Bosnick
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE-2.0 or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms

//! The engine that connects the host bus, the card and the storage device.
//!
//! Three roles share one [`SdProxy`]:
//!     - bus exchange: clocks one chunk at a time with the host and watches the
//!       received bytes for command frames,
//!     - command: runs the card state machine on one frame and queues the
//!       response,
//!     - block fetch: reads the next block of a data phase from storage and
//!       queues it as a data block.
//!
//! The bus role hands work to the other two with one-shot signals and an
//! atomic `processing` flag, so at most one of them touches the card and the
//! transmit queue at a time. It waits for the command role to finish, because
//! the host expects the response within a few bytes, but keeps clocking filler
//! while a block is read. The bus role itself never changes card state.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::{select::select3, yield_now};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex, signal::Signal};
use log::{error, info, warn};

use crate::{
    card::{Card, Transfer},
    cmds::{CommandFrame, RxWindow},
    common::{BLOCK_SIZE, FILLER},
    config::{Config, MAX_CHUNK_SIZE},
    regs::Registers,
    resp::TxQueue,
    storage::SectorStorage,
    transport::Transport,
};

const TAG: &str = "[SDPROXY]";

// How many times stop() yields while waiting for the bus role to finish its
// last chunk.
const STOP_POLL_LIMIT: u32 = 1_000;

struct Shared<S> {
    card: Card,
    tx: TxQueue,
    sector: [u8; BLOCK_SIZE],
    storage: S,
    config: Config,
}

/// An SD Card emulated on a host bus, backed by a storage device.
///
/// Construct it once, [`initialize`](SdProxy::initialize) it with the bus,
/// then either spawn [`run`](SdProxy::run) and call
/// [`start`](SdProxy::start), or call `start` and drive
/// [`serve`](SdProxy::serve) directly.
pub struct SdProxy<S, T> {
    shared: Mutex<CriticalSectionRawMutex, Shared<S>>,
    transport: Mutex<CriticalSectionRawMutex, Option<T>>,
    command: Signal<CriticalSectionRawMutex, CommandFrame>,
    block: Signal<CriticalSectionRawMutex, ()>,
    done: Signal<CriticalSectionRawMutex, ()>,
    start: Signal<CriticalSectionRawMutex, ()>,
    ready: AtomicBool,
    running: AtomicBool,
    stopped: AtomicBool,
    processing: AtomicBool,
}

impl<S, T> SdProxy<S, T>
where
    S: SectorStorage,
    T: Transport,
{
    /// Create an uninitialized proxy for `storage`.
    pub fn new(storage: S) -> Self {
        let config = Config::default();

        Self {
            shared: Mutex::new(Shared {
                card: Card::new(Registers::new(0), config.enforce_crc),
                tx: TxQueue::new(config.chunk_size),
                sector: [0; BLOCK_SIZE],
                storage,
                config,
            }),
            transport: Mutex::new(None),
            command: Signal::new(),
            block: Signal::new(),
            done: Signal::new(),
            start: Signal::new(),
            ready: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(true),
            processing: AtomicBool::new(false),
        }
    }

    /// Claim `transport` and build a fresh card from the storage capacity.
    ///
    /// Returns `false`, and leaves the proxy not ready, if the proxy is
    /// running, `config` is invalid, storage is not ready or the bus cannot be
    /// claimed. Any previously claimed transport is released.
    pub fn initialize(&self, mut transport: T, config: Config) -> bool {
        if self.running.load(Ordering::Acquire) {
            warn!("{} cannot initialize while running", TAG);
            return false;
        }
        if let Err(err) = config.validate() {
            warn!("{} {}", TAG, err);
            return false;
        }

        let (Ok(mut shared), Ok(mut slot)) = (self.shared.try_lock(), self.transport.try_lock())
        else {
            warn!("{} cannot initialize while a role is active", TAG);
            return false;
        };

        self.ready.store(false, Ordering::Release);
        if let Some(mut previous) = slot.take() {
            previous.release();
        }

        if !shared.storage.is_ready() {
            info!("{} ready = false (storage not ready)", TAG);
            return false;
        }
        if let Err(err) = transport.claim(&config) {
            warn!("{} unable to claim bus: {:?}", TAG, err);
            info!("{} ready = false", TAG);
            return false;
        }

        let registers = Registers::new(shared.storage.capacity_bytes());
        let sectors = registers.capacity_sectors;

        shared.card = Card::new(registers, config.enforce_crc);
        shared.tx.set_chunk_size(config.chunk_size);
        shared.config = config;
        *slot = Some(transport);

        self.processing.store(false, Ordering::Release);
        self.command.reset();
        self.block.reset();
        self.done.reset();
        self.ready.store(true, Ordering::Release);

        info!("{} ready = true ({} sectors)", TAG, sectors);
        true
    }

    /// Whether [`initialize`](SdProxy::initialize) succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether the bus role is (or is about to be) running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Let the bus role run. Returns `false` if the proxy is not ready.
    pub fn start(&self) -> bool {
        if !self.is_ready() {
            return false;
        }

        if !self.running.load(Ordering::Acquire) {
            self.stopped.store(false, Ordering::Release);
            self.running.store(true, Ordering::Release);
            self.start.signal(());
            info!("{} started", TAG);
        }

        true
    }

    /// Ask the bus role to stop after its current chunk, and wait a bounded
    /// time for it to do so.
    ///
    /// Returns whether the proxy was running.
    pub async fn stop(&self) -> bool {
        let was_running =
            self.running.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire);

        self.running.store(false, Ordering::Release);

        for _ in 0..STOP_POLL_LIMIT {
            if self.stopped.load(Ordering::Acquire) {
                return was_running;
            }
            yield_now().await;
        }

        warn!("{} bus did not stop", TAG);
        was_running
    }

    /// Release the transport and forget the card. Not possible while running.
    pub fn teardown(&self) -> Option<T> {
        if self.is_running() {
            return None;
        }

        let mut transport = self.transport.try_lock().ok()?.take()?;
        transport.release();
        self.ready.store(false, Ordering::Release);

        if let Ok(mut shared) = self.shared.try_lock() {
            shared.card.reset();
            shared.tx.clear();
        }

        Some(transport)
    }

    /// Look at the card while no role holds it.
    pub fn with_card<R>(&self, f: impl FnOnce(&Card) -> R) -> Option<R> {
        let shared = self.shared.try_lock().ok()?;
        Some(f(&shared.card))
    }

    /// Give back the storage device.
    pub fn into_storage(self) -> S {
        self.shared.into_inner().storage
    }

    /// Serve the host every time the proxy is started. Never returns.
    ///
    /// This is the future to spawn as the proxy's task.
    pub async fn run(&self) {
        loop {
            self.start.wait().await;
            self.serve().await;
        }
    }

    /// Serve the host from [`start`](SdProxy::start) until
    /// [`stop`](SdProxy::stop) or a transport failure.
    pub async fn serve(&self) {
        if !self.is_running() {
            // A stop() that overtook start() is still waiting for this.
            self.stopped.store(true, Ordering::Release);
            return;
        }

        self.processing.store(false, Ordering::Release);
        self.command.reset();
        self.block.reset();
        self.done.reset();

        {
            let mut slot = self.transport.lock().await;
            match slot.as_mut() {
                Some(transport) => {
                    select3(
                        self.bus_exchange(transport),
                        self.command_role(),
                        self.block_role(),
                    )
                    .await;
                }
                None => warn!("{} started without a transport", TAG),
            }
        }

        self.running.store(false, Ordering::Release);
        self.stopped.store(true, Ordering::Release);
        info!("{} stopped", TAG);
    }

    async fn bus_exchange(&self, transport: &mut T) {
        let chunk_size = self.shared.lock().await.config.chunk_size;
        let mut tx_buffer = [FILLER; MAX_CHUNK_SIZE];
        let mut rx_buffer = [FILLER; MAX_CHUNK_SIZE];
        let tx = &mut tx_buffer[..chunk_size];
        let rx = &mut rx_buffer[..chunk_size];
        let mut window = RxWindow::new();

        while self.running.load(Ordering::Acquire) {
            self.load_chunk(tx);

            let received = match transport.exchange(tx, rx) {
                Ok(count) => count.min(chunk_size),
                Err(err) => {
                    error!("{} bus exchange failed: {:?}", TAG, err);
                    break;
                }
            };
            window.push(&rx[..received]);

            if !self.processing.load(Ordering::Acquire) {
                if let Some(frame) = window.take_command() {
                    self.processing.store(true, Ordering::Release);
                    self.command.signal(frame);
                    self.done.wait().await;
                    continue;
                }

                if self.block_due() {
                    self.processing.store(true, Ordering::Release);
                    self.block.signal(());
                }
            }

            yield_now().await;
        }
    }

    // The queue belongs to whichever role is processing; send filler until
    // it is handed back.
    fn load_chunk(&self, out: &mut [u8]) {
        if !self.processing.load(Ordering::Acquire) {
            if let Ok(mut shared) = self.shared.try_lock() {
                shared.tx.next_chunk(out);
                return;
            }
        }

        out.fill(FILLER);
    }

    fn block_due(&self) -> bool {
        match self.shared.try_lock() {
            Ok(shared) => shared.card.has_pending_transfer() && shared.tx.is_empty(),
            Err(_) => false,
        }
    }

    async fn command_role(&self) {
        loop {
            let frame = self.command.wait().await;

            {
                let mut guard = self.shared.lock().await;
                let shared = &mut *guard;

                // A dropped frame leaves whatever was queued untouched.
                if let Some(response) = shared.card.execute(&frame) {
                    shared.tx.encode_response(&response);
                }
            }

            self.processing.store(false, Ordering::Release);
            self.done.signal(());
        }
    }

    async fn block_role(&self) {
        loop {
            self.block.wait().await;

            {
                let mut guard = self.shared.lock().await;
                let Shared {
                    card,
                    tx,
                    sector,
                    storage,
                    ..
                } = &mut *guard;

                match card.next_transfer() {
                    Transfer::None => {}
                    Transfer::Register(bytes) => tx.encode_data_block(&bytes),
                    Transfer::Block(index) => match storage.read_sector(index, sector) {
                        Ok(()) => tx.encode_data_block(&sector[..]),
                        Err(err) => {
                            warn!("{} SD read block {} failed: {:?}", TAG, index, err);
                            card.block_read_failed();
                        }
                    },
                }
            }

            self.processing.store(false, Ordering::Release);
        }
    }
}
