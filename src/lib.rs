// Copyright 2025 The Uartdma Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! DMA-Backed UART Serial Transport
//!
//! A full-duplex byte stream over a UART with both directions offloaded
//! to DMA: transmission stages into a fixed buffer moved by a one-shot
//! memory-to-peripheral stream, reception free-runs into a circular ring
//! filled by a peripheral-to-memory stream. The driver is exposed through
//! a five-operation POSIX-style device contract (`open`, `close`, `read`,
//! `write`, `ioctl`).
//!
//! The driver core is portable over the [`hw::SerialHw`] seam; two back
//! ends ship with the crate: [`mmio::MmioHw`] for STM32H7-class hardware
//! and [`loopback::LoopbackHw`], a software loopback for bring-up and
//! tests.
//!
//! The driver hands the hardware the address of its own buffers, so it
//! must sit at its final address before it comes up: bring-up is only
//! offered on a `'static` handle (a `static` item, or a leaked
//! allocation on hosted targets).
//!
//! # Example
//!
//! ```
//! use uartdma::{Device, LoopbackHw, UartDma};
//!
//! let uart: &'static UartDma<LoopbackHw> =
//!     Box::leak(Box::new(UartDma::new(LoopbackHw::new())));
//! assert_eq!(uart.open(), 0);
//!
//! let sent = uart.write(b"ping").unwrap();
//! // On hardware the vector table runs the completion handler.
//! uart.handle_tx_irq();
//! assert_eq!(sent, 4);
//!
//! let mut buf = [0u8; 16];
//! let got = uart.read(&mut buf).unwrap();
//! assert_eq!(&buf[..got], b"ping");
//! ```
//!
//! On a real target the driver lives in a `static` and the two stream
//! interrupt vectors call into it:
//!
//! ```no_run
//! use uartdma::{mmio::MmioHw, UartDma};
//!
//! static UART: UartDma<MmioHw> = UartDma::new(unsafe { MmioHw::new() });
//!
//! fn bring_up() {
//!     UART.init().unwrap();
//! }
//!
//! #[no_mangle]
//! extern "C" fn dma1_stream0_handler() {
//!     UART.handle_rx_irq();
//! }
//!
//! #[no_mangle]
//! extern "C" fn dma1_stream1_handler() {
//!     UART.handle_tx_irq();
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod device;
pub mod hw;
pub mod loopback;
pub mod mmio;
pub mod status;
pub mod uart;

// Re-exports
pub use device::{Device, IoctlArg};
pub use loopback::LoopbackHw;
pub use status::{Error, Result, Status};
pub use uart::UartDma;
