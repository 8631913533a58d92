//! Error type shared by every part of the driver.
//!
//! Errors fall into two tiers. Recoverable errors (bad pixel index, bad
//! brightness, bad configuration, a second driver instance) leave all state
//! untouched and are meant to be handled by the caller. Fatal errors mean the
//! driver could not acquire or verify a hardware resource; see
//! [`Error::is_fatal`] and [`crate::lifecycle::escalate`].

use std::io;

/// Errors reported by the driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A pixel index was outside `[0, len)`.
    #[error("pixel {index} is out of range for a strip of {len} LEDs")]
    IndexOutOfRange {
        /// The rejected index
        index: usize,
        /// Number of LEDs in the strip
        len: usize,
    },

    /// A brightness outside `[0, 1]` (or NaN) was rejected.
    #[error("brightness {0} is outside [0, 1]")]
    BrightnessOutOfRange(f32),

    /// The configuration names hardware that does not exist.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Another driver instance is already live in this process.
    #[error("a WS2812 driver instance is already live in this process")]
    AlreadyInUse,

    /// The driver was terminated and can no longer transfer frames.
    #[error("the driver has been terminated")]
    Terminated,

    /// A device or kernel file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path that failed to open
        path: &'static str,
        /// Underlying OS error
        source: io::Error,
    },

    /// Mapping a physical register window failed.
    #[error("failed to map peripheral at {base:#010x}: {source}")]
    MapPeripheral {
        /// Physical base address of the window
        base: u32,
        /// Underlying OS error
        source: io::Error,
    },

    /// Allocating locked memory for the DMA control data failed.
    #[error("failed to allocate {pages} locked pages: {source}")]
    Allocate {
        /// Number of pages requested
        pages: usize,
        /// Underlying OS error
        source: io::Error,
    },

    /// The locked region does not start on a page boundary.
    #[error("locked region at {0:#x} is not page aligned")]
    Misaligned(usize),

    /// Reading the per-process page map failed.
    #[error("failed to read the page map: {0}")]
    PageMap(#[source] io::Error),

    /// The kernel reported a locked page as not resident.
    #[error("page {page} is not present (page map entry {entry:#018x})")]
    PageNotPresent {
        /// Index of the page within the locked region
        page: usize,
        /// Raw page map entry
        entry: u64,
    },

    /// A virtual address does not lie inside the locked region.
    #[error("address {0:#x} is outside the locked DMA region")]
    AddressOutOfRange(usize),

    /// A physical address does not belong to any page of the locked region.
    #[error("failed to reverse map physical address {0:#010x}")]
    ReverseMap(u32),
}

impl Error {
    /// Returns `true` for errors after which the hardware state can no longer
    /// be trusted. These should end the process via
    /// [`crate::lifecycle::escalate`].
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::IndexOutOfRange { .. }
                | Self::BrightnessOutOfRange(_)
                | Self::InvalidConfig(_)
                | Self::AlreadyInUse
                | Self::Terminated
        )
    }
}
