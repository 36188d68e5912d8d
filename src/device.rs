// Copyright 2025 The Uartdma Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Unified Device Contract
//!
//! Generic five-operation interface implemented by every transport in the
//! system. Operations return `0` (or a non-negative byte count) on success
//! and a negative status code on error.

use crate::status::Status;

/// Base of the vendor-specific ioctl command range
pub const CMD_DEVICE_BASE: u32 = 0x8000;

/// Initialize the UART and both DMA streams
pub const UART_INIT: u32 = CMD_DEVICE_BASE;
/// Shut the UART down and release both DMA streams
pub const UART_DEINIT: u32 = CMD_DEVICE_BASE + 1;
/// Query unread RX bytes; requires [`IoctlArg::OutInt`]
pub const UART_GET_AVAILABLE: u32 = CMD_DEVICE_BASE + 2;
/// Discard unread RX bytes and resynchronize the ring
pub const UART_FLUSH: u32 = CMD_DEVICE_BASE + 3;
/// Reconfigure the line rate; requires [`IoctlArg::InU32`]
pub const UART_SET_BAUDRATE: u32 = CMD_DEVICE_BASE + 4;
/// Query the configured line rate; requires [`IoctlArg::OutU32`]
pub const UART_GET_BAUDRATE: u32 = CMD_DEVICE_BASE + 5;

/// Argument slot for [`Device::ioctl`]
///
/// Stands in for the untyped pointer of a classic ioctl: `None` is the
/// null pointer, the other variants carry a typed in- or out-parameter.
/// A command handed the wrong variant fails with invalid-args.
pub enum IoctlArg<'a> {
    /// No argument supplied
    None,
    /// Out-parameter for a signed count
    OutInt(&'a mut i32),
    /// In-parameter carrying a 32-bit value
    InU32(u32),
    /// Out-parameter for a 32-bit value
    OutU32(&'a mut u32),
}

/// Unified device interface
///
/// `open` initializes the device if needed, `close` deinitializes it;
/// both are idempotent. `read` and `write` return the number of bytes
/// moved, and `ioctl` multiplexes device-specific control commands.
///
/// Transports that hand hardware the address of their own storage
/// implement this on a `'static` handle rather than on the driver value
/// itself, so opening is only possible once the driver can no longer
/// move.
pub trait Device {
    /// Initialize and open the device
    fn open(&self) -> Status;

    /// Close and deinitialize the device
    fn close(&self) -> Status;

    /// Read data from the device; returns bytes read
    fn read(&self, buf: &mut [u8]) -> Status;

    /// Write data to the device; returns bytes written
    fn write(&self, buf: &[u8]) -> Status;

    /// Device control and configuration
    fn ioctl(&self, cmd: u32, arg: IoctlArg<'_>) -> Status;
}
