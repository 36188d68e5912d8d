// Copyright 2025 The Uartdma Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Driver Status Codes
//!
//! This module provides the status codes and error type used throughout
//! the driver. Errors cross the device contract as negative POSIX-style
//! values; inside the driver they travel as [`Error`].

/// Error code type (negative values indicate errors)
pub type Status = i32;

/// Success status code
pub const OK: Status = 0;

/// Result type for driver operations
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Driver error codes
///
/// Discriminants are the negative errno values returned across the
/// device contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Bad argument: empty buffer, missing ioctl argument, zero baud rate
    InvalidArgs = -22,
    /// Operation requested while the driver is uninitialized
    NoDevice = -19,
    /// TX busy-wait exhausted before the previous transfer completed
    TimedOut = -110,
    /// Unrecognized ioctl command
    NotSupported = -95,
}

impl Error {
    /// Convert error to status code
    pub fn to_status(self) -> Status {
        self as Status
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

/// Collapse a driver result into a raw status code
pub fn status_from(result: Result<()>) -> Status {
    match result {
        Ok(()) => OK,
        Err(err) => err.to_status(),
    }
}
