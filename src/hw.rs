// Copyright 2025 The Uartdma Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Hardware Seam
//!
//! [`SerialHw`] captures every register touch the portable driver core
//! performs, so the same core drives real memory-mapped hardware
//! ([`crate::mmio::MmioHw`]) and the software loopback harness
//! ([`crate::loopback::LoopbackHw`]).
//!
//! The transmit stream is one-shot memory-to-peripheral; the receive
//! stream is circular peripheral-to-memory and free-runs once armed. The
//! live remaining-transfer counter is the only reception progress source
//! the core consumes.

/// Register-level access to a UART and its pair of DMA streams
pub trait SerialHw {
    /// Route the TX/RX pins to the UART alternate function and set their
    /// drive characteristics. First hardware touch during init.
    fn configure_pins(&self);

    /// Write the baud-rate divisor register
    fn set_divisor(&self, divisor: u32);

    /// Enable transmitter and receiver and spin until the hardware
    /// acknowledges both enables
    fn enable_uart(&self);

    /// Disable the peripheral
    fn disable_uart(&self);

    /// Gate TX DMA request generation on the peripheral
    fn set_tx_request(&self, on: bool);

    /// Gate RX DMA request generation on the peripheral
    fn set_rx_request(&self, on: bool);

    /// Stop the TX stream, spinning until the hardware confirms disable
    fn tx_stream_stop(&self);

    /// Arm a one-shot memory-to-peripheral transfer of `len` bytes
    /// starting at `src`
    ///
    /// # Safety
    ///
    /// `src` must stay valid and unmodified until the transfer completes
    /// or the stream is stopped.
    unsafe fn tx_stream_start(&self, src: *const u8, len: u32);

    /// Whether the TX completion flag is raised
    fn tx_complete(&self) -> bool;

    /// Acknowledge the TX completion flag
    fn tx_ack_complete(&self);

    /// Stop the RX stream, spinning until the hardware confirms disable
    fn rx_stream_stop(&self);

    /// Arm a circular peripheral-to-memory capture of `len` bytes into
    /// `dst`
    ///
    /// # Safety
    ///
    /// `dst` must stay valid for `len` bytes until the stream is stopped;
    /// the hardware writes it at any time while armed.
    unsafe fn rx_stream_start(&self, dst: *mut u8, len: u32);

    /// Live remaining-transfer counter of the RX stream
    ///
    /// Counts down from the programmed length as bytes arrive and
    /// reloads to the programmed length when it reaches zero.
    fn rx_remaining(&self) -> u32;

    /// Acknowledge pending RX half/full transfer events
    fn rx_ack_events(&self);

    /// Enable the completion interrupt lines for both streams
    fn enable_irqs(&self);

    /// Disable the completion interrupt lines for both streams
    fn disable_irqs(&self);
}
