//! DMA-driven WS2812 ("NeoPixel") LED strip driver for the Raspberry Pi.
//!
//! ## How WS2812 LEDs Work
//!
//! A WS2812 strip is a chain of LEDs on a single data line. Each LED takes the
//! first 24 bits it sees, passes everything after them down the chain, and
//! shows the new colour once the line has been low for longer than the reset
//! time.
//!
//! ### Bit encoding
//! - Every data bit is a fixed-length high pulse followed by a low period;
//!   a long high pulse is a `1`, a short one a `0`.
//! - Colour bits are sent most significant bit first, green byte, then red,
//!   then blue (G-R-B).
//!
//! ### Generating the waveform with PWM and DMA
//! The PWM peripheral in serializer mode shifts 32-bit words out of its FIFO
//! one bit per clock. With the PWM clock at 2.5 MHz each wire bit lasts
//! 0.4 µs, so one colour bit is three wire bits:
//! - `1` → `110` (0.8 µs high, 0.4 µs low)
//! - `0` → `100` (0.4 µs high, 0.8 µs low)
//!
//! A DMA channel feeds the FIFO from a buffer of encoded words in locked
//! memory, paced by the PWM data request line, so a frame goes out without
//! any CPU involvement. Zero words after the last LED keep the line low and
//! latch the frame.
//!
//! ### Implications for the driver
//! - The DMA engine only understands bus addresses, so the frame buffer lives
//!   in locked pages whose physical frames are resolved through
//!   `/proc/self/pagemap` (see [`pagemap`]).
//! - The PWM, clock, GPIO and DMA registers are mapped from `/dev/mem` (see
//!   [`peripheral`]); both need root.
//! - A running DMA channel keeps writing into memory after the process dies,
//!   so every exit path stops it first (see [`lifecycle`]).
//!
//! ## Driver Layout
//!
//! 1. [`PixelBuffer`] holds the colours and the brightness.
//! 2. [`Waveform`] encodes them into wire bits.
//! 3. [`dma::DmaController`] copies the waveform into the DMA sample buffer,
//!    starts the channel and waits for the frame to drain.
//!
//! [`NeoPixel`] ties the three together behind a small pixel API.
//!
//! ## Available Feature Flags
//!
//! ### `defmt` Feature
//! Implements `defmt::Format` for the waveform and the small enums so they
//! can be emitted with the `defmt` logging framework. No functional changes.
//!
//! ### `demo` Feature
//! Builds the `ws2812-fill` binary, which fills a strip with one colour.
//!
//! ```toml
//! [dependencies]
//! ws2812-rpi = { version = "0.1.0", features = ["defmt"] }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use std::time::Duration;

use embedded_graphics::pixelcolor::Rgb888;

pub mod config;
pub mod dma;
pub mod error;
pub mod lifecycle;
pub mod neopixel;
pub mod pagemap;
pub mod peripheral;
pub mod pixels;
pub mod registers;
pub mod waveform;

pub use config::Config;
pub use error::Error;
pub use lifecycle::OrEscalate;
pub use neopixel::NeoPixel;
pub use pixels::PixelBuffer;
pub use waveform::Waveform;

use waveform::{WAVEFORM_BITS, WAVEFORM_WORDS, WIRE_BITS_PER_LED};

/// Color type used for every LED
pub type Color = Rgb888;

/// Duration of one wire bit at the default PWM clock, in nanoseconds.
pub const WIRE_BIT_NANOS: u64 = 400;

/// Computes the number of words the DMA engine sends per frame
///
/// Each LED takes 72 wire bits, i.e. 2.25 words; one extra word of zeros
/// latches the frame. The result never exceeds the sample buffer.
///
/// # Arguments
///
/// * `led_count` - Number of LEDs on the strip
///
/// # Returns
///
/// Words per transfer, at most [`WAVEFORM_WORDS`]
#[must_use]
pub const fn compute_transfer_words(led_count: usize) -> usize {
    let words = led_count.saturating_mul(9).div_ceil(4).saturating_add(1);
    if words < WAVEFORM_WORDS {
        words
    } else {
        WAVEFORM_WORDS
    }
}

/// Computes the transfer length written into the DMA control block
///
/// # Arguments
///
/// * `led_count` - Number of LEDs on the strip
///
/// # Returns
///
/// Transfer length in bytes
#[must_use]
pub const fn compute_transfer_bytes(led_count: usize) -> u32 {
    (compute_transfer_words(led_count) * 4) as u32
}

/// Computes how many LEDs fit into the sample buffer
#[must_use]
pub const fn compute_max_leds() -> usize {
    WAVEFORM_BITS / WIRE_BITS_PER_LED
}

/// Computes how long `show` waits for a frame to drain
///
/// This is the time the whole sample buffer takes on the wire, an upper
/// bound for any strip length.
#[must_use]
pub const fn compute_drain_time() -> Duration {
    Duration::from_nanos(WAVEFORM_BITS as u64 * WIRE_BIT_NANOS)
}
