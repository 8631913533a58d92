//! The strip driver.
//!
//! [`NeoPixel`] ties the colour buffer, the waveform encoder and the DMA
//! controller together. Pixel and brightness calls only touch memory;
//! [`NeoPixel::show`] encodes the buffer and blocks while the frame goes out.
//!
//! ```no_run
//! use ws2812_rpi::{Error, NeoPixel};
//!
//! fn main() -> Result<(), Error> {
//!     let mut strip = NeoPixel::new(60)?;
//!     strip.set_brightness(0.2)?;
//!     for i in 0..strip.len() {
//!         strip.set_pixel_color(i, 0, 0, 255)?;
//!     }
//!     strip.show()
//! }
//! ```

use log::{info, trace};

use crate::config::Config;
use crate::dma::{DmaController, TransferState};
use crate::lifecycle;
use crate::pixels::PixelBuffer;
use crate::waveform::Waveform;
use crate::{Color, Error};

/// A WS2812 strip on the PWM output, fed by DMA.
///
/// Only one may be alive per process; the DMA controller holds the slot.
/// Dropping it stops the hardware and releases the mappings.
#[derive(Debug)]
pub struct NeoPixel {
    buffer: PixelBuffer,
    waveform: Box<Waveform>,
    controller: DmaController,
    registered: bool,
}

impl NeoPixel {
    /// Drives `led_count` LEDs with the default [`Config`].
    ///
    /// # Errors
    ///
    /// See [`NeoPixel::with_config`].
    pub fn new(led_count: usize) -> Result<Self, Error> {
        Self::with_config(&Config::default(), led_count)
    }

    /// Drives `led_count` LEDs on the hardware described by `config`.
    ///
    /// Needs root for `/dev/mem` and the page map. LEDs beyond
    /// [`crate::compute_max_leds`] are kept in the buffer but never sent.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInUse`] if another driver is alive,
    /// [`Error::InvalidConfig`] for a bad `config`, and the fatal mapping and
    /// allocation errors. Whatever was acquired is released again.
    pub fn with_config(config: &Config, led_count: usize) -> Result<Self, Error> {
        let controller = DmaController::configure(config, led_count)?;
        lifecycle::install_signal_handlers();
        let (dma, pwm) = controller.register_bases();
        lifecycle::register_quiesce(dma, pwm);
        info!(
            "driving {led_count} LEDs on GPIO {} through DMA channel {}",
            config.pin.number(),
            config.dma_channel
        );
        Ok(Self::from_parts(led_count, controller, true))
    }

    fn from_parts(led_count: usize, controller: DmaController, registered: bool) -> Self {
        Self {
            buffer: PixelBuffer::new(led_count),
            waveform: Box::new(Waveform::new()),
            controller,
            registered,
        }
    }

    /// Encodes the buffer at the current brightness and sends it, blocking
    /// until the frame has drained.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] after [`NeoPixel::terminate`].
    pub fn show(&mut self) -> Result<(), Error> {
        let bits = self
            .waveform
            .encode(self.buffer.pixels(), self.buffer.brightness());
        trace!("encoded {bits} wire bits");
        self.controller.transfer(&*self.waveform)
    }

    /// Sets LED `index` from its channels.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`]; nothing is changed.
    pub fn set_pixel_color(&mut self, index: usize, r: u8, g: u8, b: u8) -> Result<(), Error> {
        self.buffer.set_rgb(index, r, g, b)
    }

    /// Sets LED `index`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`]; nothing is changed.
    pub fn set_color(&mut self, index: usize, color: Color) -> Result<(), Error> {
        self.buffer.set_color(index, color)
    }

    /// Colour of LED `index`, before brightness.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`].
    pub fn pixel_color(&self, index: usize) -> Result<Color, Error> {
        self.buffer.color(index)
    }

    /// Sets the brightness applied by the next [`NeoPixel::show`].
    ///
    /// # Errors
    ///
    /// [`Error::BrightnessOutOfRange`] unless `0.0 <= value <= 1.0`.
    pub fn set_brightness(&mut self, value: f32) -> Result<(), Error> {
        self.buffer.set_brightness(value)
    }

    /// Current brightness.
    #[must_use]
    pub fn brightness(&self) -> f32 {
        self.buffer.brightness()
    }

    /// Number of LEDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` for a strip without LEDs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Turns every LED off in the buffer; call [`NeoPixel::show`] to send it.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// All colours in strip order.
    #[must_use]
    pub fn pixels(&self) -> &[Color] {
        self.buffer.pixels()
    }

    /// The colour buffer.
    #[must_use]
    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// The colour buffer, e.g. as an `embedded-graphics` draw target.
    pub fn buffer_mut(&mut self) -> &mut PixelBuffer {
        &mut self.buffer
    }

    /// The waveform sent by the last [`NeoPixel::show`].
    #[must_use]
    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    /// State of the DMA controller.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.controller.state()
    }

    /// Stops the hardware now. Later [`NeoPixel::show`] calls fail; the
    /// buffer stays usable.
    pub fn terminate(&mut self) {
        // signals must still find the windows while they are being stopped
        self.controller.terminate();
        self.unregister();
    }

    fn unregister(&mut self) {
        if self.registered {
            lifecycle::unregister_quiesce();
            self.registered = false;
        }
    }
}

impl Drop for NeoPixel {
    fn drop(&mut self) {
        self.terminate();
    }
}
