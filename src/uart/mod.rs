// Copyright 2025 The Uartdma Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! DMA-Backed UART Transport Driver
//!
//! Transmission stages caller data into a fixed buffer and arms a
//! one-shot memory-to-peripheral DMA transfer; the completion handler
//! clears the busy flag and disables the DMA trigger. Reception
//! free-runs: a circular peripheral-to-memory stream fills a ring that
//! software never writes, and the number of unread bytes is derived on
//! demand from the stream's live remaining-transfer counter against a
//! software read cursor. No handler bookkeeping is needed on the RX
//! path.
//!
//! Concurrency is strictly foreground code versus interrupt handlers.
//! The handler is the sole writer of the busy flag's `false` transition
//! (release-store); the foreground is the sole writer of `true` and only
//! touches the staging buffer after an acquire-load observes `false`.
//! All remaining mutable state is foreground-only and sits behind a
//! spinlock.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::device::{
    Device, IoctlArg, UART_DEINIT, UART_FLUSH, UART_GET_AVAILABLE, UART_GET_BAUDRATE, UART_INIT,
    UART_SET_BAUDRATE,
};
use crate::hw::SerialHw;
use crate::status::{status_from, Error, Result, Status, OK};

/// TX staging buffer capacity in bytes
pub const TX_BUFFER_SIZE: usize = 256;

/// RX ring capacity in bytes
pub const RX_BUFFER_SIZE: usize = 256;

/// Line rate configured by `init`
pub const DEFAULT_BAUDRATE: u32 = 115_200;

/// UART kernel clock in Hz, fixed at build time
pub const PERIPH_CLOCK_HZ: u32 = 120_000_000;

/// Iteration bound for the TX busy spin-wait
const TX_SPIN_LIMIT: u32 = 10_000_000;

/// Baud-rate divisor for a requested bit rate, with integer rounding
#[inline]
pub fn divisor_for(bps: u32) -> u32 {
    (PERIPH_CLOCK_HZ + bps / 2) / bps
}

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Ready,
}

/// Foreground-owned mutable state
struct Inner {
    state: State,
    baud: u32,
    /// Next unread position in the RX ring; always `< RX_BUFFER_SIZE`
    rx_cursor: u32,
}

/// DMA-backed serial transport over a [`SerialHw`] back end
///
/// One instance owns both transfer buffers and all driver state; allocate
/// it in a `static` and wire [`UartDma::handle_tx_irq`] /
/// [`UartDma::handle_rx_irq`] into the two DMA stream interrupt vectors.
///
/// [`UartDma::init`] arms the receive stream with the address of the
/// driver's own ring, so it is only offered on a `'static` handle: the
/// driver must already sit at its final address (a `static` item or a
/// leaked allocation), and the `'static` borrow keeps it from ever
/// moving while the hardware holds that address.
pub struct UartDma<H: SerialHw> {
    hw: H,
    inner: Mutex<Inner>,
    /// True iff a TX transfer is outstanding; cleared only by the TX
    /// completion handler
    tx_busy: AtomicBool,
    /// Staging buffer the TX stream reads from
    tx_buf: UnsafeCell<[u8; TX_BUFFER_SIZE]>,
    /// Ring the RX stream writes into; software only reads it
    rx_buf: UnsafeCell<[u8; RX_BUFFER_SIZE]>,
}

// Safety: the staging buffer is mutated only by foreground code that has
// observed `tx_busy == false` under the foreground lock, the RX ring is
// written only by the armed back end and read through volatile loads,
// and everything else is behind the spinlock or atomic.
unsafe impl<H: SerialHw + Send> Send for UartDma<H> {}
unsafe impl<H: SerialHw + Sync> Sync for UartDma<H> {}

impl<H: SerialHw> UartDma<H> {
    /// Create an uninitialized driver over the given back end
    pub const fn new(hw: H) -> Self {
        Self {
            hw,
            inner: Mutex::new(Inner {
                state: State::Uninitialized,
                baud: DEFAULT_BAUDRATE,
                rx_cursor: 0,
            }),
            tx_busy: AtomicBool::new(false),
            tx_buf: UnsafeCell::new([0; TX_BUFFER_SIZE]),
            rx_buf: UnsafeCell::new([0; RX_BUFFER_SIZE]),
        }
    }

    /// Access the hardware back end
    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Bring the UART and both DMA streams up; no-op when already ready
    ///
    /// Arms the receive stream with the address of the driver's own
    /// ring, so the driver must have reached its final address: the
    /// `'static` receiver keeps it from being moved afterwards.
    pub fn init(&'static self) -> Result {
        let mut inner = self.inner.lock();
        if inner.state == State::Ready {
            return Ok(());
        }

        self.hw.configure_pins();

        unsafe {
            *self.tx_buf.get() = [0; TX_BUFFER_SIZE];
            *self.rx_buf.get() = [0; RX_BUFFER_SIZE];
        }

        // Continuous capture over the whole ring. The TX stream stays
        // idle until the first write arms it.
        self.hw.rx_stream_stop();
        self.hw.rx_ack_events();
        unsafe {
            self.hw
                .rx_stream_start(self.rx_buf.get().cast(), RX_BUFFER_SIZE as u32);
        }

        inner.baud = DEFAULT_BAUDRATE;
        self.hw.set_divisor(divisor_for(DEFAULT_BAUDRATE));

        self.hw.set_tx_request(true);
        self.hw.set_rx_request(true);
        self.hw.enable_uart();
        self.hw.enable_irqs();

        inner.rx_cursor = 0;
        self.tx_busy.store(false, Ordering::Release);
        inner.state = State::Ready;

        log::info!("uart: ready at {} baud", DEFAULT_BAUDRATE);
        Ok(())
    }

    /// Shut the UART down; no-op when already uninitialized
    pub fn deinit(&self) -> Result {
        let mut inner = self.inner.lock();
        if inner.state == State::Uninitialized {
            return Ok(());
        }

        self.hw.disable_uart();
        self.hw.rx_stream_stop();
        self.hw.tx_stream_stop();
        self.hw.set_tx_request(false);
        self.hw.set_rx_request(false);
        self.hw.disable_irqs();

        inner.rx_cursor = 0;
        self.tx_busy.store(false, Ordering::Release);
        inner.state = State::Uninitialized;

        log::info!("uart: shut down");
        Ok(())
    }

    /// Stage `data` and arm a TX transfer
    ///
    /// Input longer than the staging buffer is silently truncated to
    /// [`TX_BUFFER_SIZE`]; the returned count is what was actually
    /// staged. Spins (bounded) while a previous transfer is outstanding.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Err(Error::InvalidArgs);
        }

        let inner = self.inner.lock();
        if inner.state != State::Ready {
            return Err(Error::NoDevice);
        }

        let len = data.len().min(TX_BUFFER_SIZE);

        // Bounded spin for the previous transfer. No scheduler to yield
        // to; the caller owns the retry decision on timeout.
        let mut spins = TX_SPIN_LIMIT;
        while self.tx_busy.load(Ordering::Acquire) {
            if spins == 0 {
                log::warn!("uart: tx completion never observed");
                return Err(Error::TimedOut);
            }
            spins -= 1;
            core::hint::spin_loop();
        }

        // Busy is clear and we hold the foreground lock, so the staging
        // buffer is ours.
        unsafe {
            (&mut *self.tx_buf.get())[..len].copy_from_slice(&data[..len]);
        }
        self.tx_busy.store(true, Ordering::Release);

        self.hw.tx_stream_stop();
        self.hw.tx_ack_complete();
        unsafe {
            self.hw.tx_stream_start(self.tx_buf.get().cast(), len as u32);
        }
        self.hw.set_tx_request(true);

        Ok(len)
    }

    /// Copy unread bytes out of the RX ring
    ///
    /// Returns `Ok(0)` when nothing is pending; that is not an error.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.state != State::Ready {
            return Err(Error::NoDevice);
        }

        let avail = self.available_locked(&inner);
        let count = buf.len().min(avail);
        let ring = self.rx_buf.get() as *const u8;
        for slot in buf[..count].iter_mut() {
            // The ring is written behind the compiler's back.
            *slot = unsafe { core::ptr::read_volatile(ring.add(inner.rx_cursor as usize)) };
            inner.rx_cursor = (inner.rx_cursor + 1) % RX_BUFFER_SIZE as u32;
        }

        Ok(count)
    }

    /// Number of received bytes not yet consumed by [`UartDma::read`]
    ///
    /// Returns 0 when the driver is not ready.
    pub fn available(&self) -> usize {
        self.available_checked().unwrap_or(0)
    }

    /// As [`UartDma::available`], but uninitialized is an error
    pub fn available_checked(&self) -> Result<usize> {
        let inner = self.inner.lock();
        if inner.state != State::Ready {
            return Err(Error::NoDevice);
        }
        Ok(self.available_locked(&inner))
    }

    fn available_locked(&self, inner: &Inner) -> usize {
        let cap = RX_BUFFER_SIZE as u32;
        // The counter only ever decrements then reloads to the full
        // length, so received == 0 right after a reload; the cursor
        // comparison absorbs the wraparound.
        let received = cap - self.hw.rx_remaining();
        let pending = if received >= inner.rx_cursor {
            received - inner.rx_cursor
        } else {
            (cap - inner.rx_cursor) + received
        };
        pending as usize
    }

    /// Discard unread bytes and resynchronize software and hardware
    /// cursors to the ring start
    pub fn flush(&self) -> Result {
        let mut inner = self.inner.lock();
        if inner.state != State::Ready {
            return Err(Error::NoDevice);
        }

        self.hw.rx_stream_stop();
        inner.rx_cursor = 0;
        self.hw.rx_ack_events();
        unsafe {
            self.hw
                .rx_stream_start(self.rx_buf.get().cast(), RX_BUFFER_SIZE as u32);
        }

        log::debug!("uart: rx ring flushed");
        Ok(())
    }

    /// Reconfigure the line rate
    ///
    /// Stores the requested rate (not the quantized one) for
    /// [`UartDma::baud`]. Usable before init; `init` overwrites it with
    /// the default.
    pub fn set_baud(&self, bps: u32) -> Result {
        if bps == 0 {
            return Err(Error::InvalidArgs);
        }

        let mut inner = self.inner.lock();
        self.hw.set_divisor(divisor_for(bps));
        inner.baud = bps;

        log::debug!("uart: {} baud, divisor {}", bps, divisor_for(bps));
        Ok(())
    }

    /// Currently configured line rate
    pub fn baud(&self) -> u32 {
        self.inner.lock().baud
    }

    /// TX completion handler; call from the TX stream interrupt vector
    ///
    /// Acknowledges the completion flag, releases the staging buffer by
    /// clearing the busy flag, and disables the DMA trigger so the next
    /// write starts from a clean peripheral state.
    pub fn handle_tx_irq(&self) {
        if self.hw.tx_complete() {
            self.hw.tx_ack_complete();
            self.tx_busy.store(false, Ordering::Release);
            self.hw.set_tx_request(false);
        }
    }

    /// RX half/full completion handler; call from the RX stream
    /// interrupt vector
    ///
    /// Only acknowledges the pending events. Reception progress is
    /// recomputed live from the remaining-transfer counter, so there is
    /// nothing to record here.
    pub fn handle_rx_irq(&self) {
        self.hw.rx_ack_events();
    }
}

// The contract is carried by a `'static` handle rather than the driver
// value itself: `open` arms DMA against the driver's own buffers, so it
// is only reachable once the driver can no longer move.
impl<H: SerialHw> Device for &'static UartDma<H> {
    fn open(&self) -> Status {
        status_from(UartDma::init(*self))
    }

    fn close(&self) -> Status {
        status_from(self.deinit())
    }

    fn read(&self, buf: &mut [u8]) -> Status {
        match UartDma::read(self, buf) {
            Ok(n) => n as Status,
            Err(err) => err.to_status(),
        }
    }

    fn write(&self, buf: &[u8]) -> Status {
        match UartDma::write(self, buf) {
            Ok(n) => n as Status,
            Err(err) => err.to_status(),
        }
    }

    fn ioctl(&self, cmd: u32, arg: IoctlArg<'_>) -> Status {
        match cmd {
            UART_INIT => status_from(UartDma::init(*self)),
            UART_DEINIT => status_from(self.deinit()),
            UART_GET_AVAILABLE => match arg {
                IoctlArg::OutInt(out) => match self.available_checked() {
                    Ok(n) => {
                        *out = n as i32;
                        OK
                    }
                    Err(err) => err.to_status(),
                },
                _ => Error::InvalidArgs.to_status(),
            },
            UART_FLUSH => status_from(self.flush()),
            UART_SET_BAUDRATE => match arg {
                IoctlArg::InU32(bps) => status_from(self.set_baud(bps)),
                _ => Error::InvalidArgs.to_status(),
            },
            UART_GET_BAUDRATE => match arg {
                IoctlArg::OutU32(out) => {
                    *out = self.baud();
                    OK
                }
                _ => Error::InvalidArgs.to_status(),
            },
            _ => Error::NotSupported.to_status(),
        }
    }
}
