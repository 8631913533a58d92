//! The strip's colour buffer.
//!
//! A [`PixelBuffer`] holds one [`Color`] per LED in strip order plus the
//! brightness applied at encode time. Its length is fixed when it is created.
//! Out-of-range indices and brightness values are rejected without touching
//! the buffer.
//!
//! The buffer is also an `embedded-graphics` draw target, `len` pixels wide
//! and one pixel high:
//!
//! ```rust
//! use embedded_graphics::pixelcolor::RgbColor;
//! use embedded_graphics::prelude::*;
//! use embedded_graphics::primitives::{Line, PrimitiveStyle};
//! use ws2812_rpi::{Color, PixelBuffer};
//!
//! let mut strip = PixelBuffer::new(30);
//! Line::new(Point::new(5, 0), Point::new(9, 0))
//!     .into_styled(PrimitiveStyle::with_stroke(Color::BLUE, 1))
//!     .draw(&mut strip)
//!     .unwrap();
//! assert_eq!(strip.color(7).unwrap(), Color::BLUE);
//! ```

use core::convert::Infallible;

use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::{DrawTarget, OriginDimensions, Size};
use embedded_graphics::Pixel;
use log::debug;

use crate::{Color, Error};

/// Brightness a new buffer starts with.
pub const DEFAULT_BRIGHTNESS: f32 = 1.0;

/// Colour of every LED on the strip, plus the global brightness.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pixels: Vec<Color>,
    brightness: f32,
}

impl PixelBuffer {
    /// A buffer of `len` unlit LEDs at full brightness.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            pixels: vec![Color::BLACK; len],
            brightness: DEFAULT_BRIGHTNESS,
        }
    }

    /// Number of LEDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Returns `true` for a strip without LEDs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Sets the colour of LED `index`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if `index >= len`; the buffer is unchanged.
    pub fn set_color(&mut self, index: usize, color: Color) -> Result<(), Error> {
        let len = self.pixels.len();
        let Some(pixel) = self.pixels.get_mut(index) else {
            debug!("rejected set of pixel {index} on a strip of {len}");
            return Err(Error::IndexOutOfRange { index, len });
        };
        *pixel = color;
        Ok(())
    }

    /// Sets the colour of LED `index` from its channels.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if `index >= len`; the buffer is unchanged.
    pub fn set_rgb(&mut self, index: usize, r: u8, g: u8, b: u8) -> Result<(), Error> {
        self.set_color(index, Color::new(r, g, b))
    }

    /// Colour of LED `index`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if `index >= len`.
    pub fn color(&self, index: usize) -> Result<Color, Error> {
        self.pixels.get(index).copied().ok_or_else(|| {
            debug!("rejected read of pixel {index} on a strip of {}", self.len());
            Error::IndexOutOfRange {
                index,
                len: self.len(),
            }
        })
    }

    /// Turns every LED off. Brightness is kept.
    pub fn clear(&mut self) {
        self.pixels.fill(Color::BLACK);
    }

    /// Sets the brightness used when the buffer is encoded.
    ///
    /// # Errors
    ///
    /// [`Error::BrightnessOutOfRange`] unless `0.0 <= value <= 1.0`; the
    /// previous brightness is kept.
    pub fn set_brightness(&mut self, value: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&value) {
            debug!("rejected brightness {value}");
            return Err(Error::BrightnessOutOfRange(value));
        }
        self.brightness = value;
        Ok(())
    }

    /// Current brightness.
    #[must_use]
    pub const fn brightness(&self) -> f32 {
        self.brightness
    }

    /// All colours in strip order.
    #[must_use]
    pub fn pixels(&self) -> &[Color] {
        &self.pixels
    }
}

impl OriginDimensions for PixelBuffer {
    fn size(&self) -> Size {
        Size::new(self.pixels.len() as u32, 1)
    }
}

impl DrawTarget for PixelBuffer {
    type Color = Color;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.y != 0 || point.x < 0 {
                continue;
            }
            if let Some(pixel) = self.pixels.get_mut(point.x as usize) {
                *pixel = color;
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.pixels.fill(color);
        Ok(())
    }
}
