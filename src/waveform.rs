//! Pixel to wire encoding.
//!
//! The PWM peripheral runs in serializer mode: every word taken from its FIFO
//! is shifted out MSB first, one bit per PWM clock tick. WS2812 bits are made
//! of three such ticks:
//!
//! ```text
//! colour bit 1  ->  1 1 0   (long high pulse)
//! colour bit 0  ->  1 0 0   (short high pulse)
//! ```
//!
//! Each LED takes 24 colour bits, sent green first, then red, then blue, most
//! significant bit first. Wire bit `b` is stored in word `b / 32` at bit
//! position `31 - b % 32`. Bits past the end of a frame stay zero, which holds
//! the line low and latches the strip.

use bitfield::bitfield;
use embedded_dma::ReadBuffer;
use embedded_graphics::pixelcolor::RgbColor;

use crate::Color;

/// Number of 32-bit words in a waveform.
pub const WAVEFORM_WORDS: usize = 1016;
/// Number of wire bits a waveform can hold.
pub const WAVEFORM_BITS: usize = WAVEFORM_WORDS * 32;
/// Colour bits per LED.
pub const COLOR_BITS: usize = 24;
/// Wire bits used for every colour bit.
pub const WIRE_BITS_PER_BIT: usize = 3;
/// Wire bits used for every LED.
pub const WIRE_BITS_PER_LED: usize = COLOR_BITS * WIRE_BITS_PER_BIT;

const ONE_BIT: [bool; WIRE_BITS_PER_BIT] = [true, true, false];
const ZERO_BIT: [bool; WIRE_BITS_PER_BIT] = [true, false, false];

bitfield! {
    /// 24-bit colour word in the order the LED expects it on the wire.
    ///
    /// The bit layout is as follows:
    /// - Bits 23-16: Green
    /// - Bits 15-8: Red
    /// - Bits 7-0: Blue
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct GrbWord(u32);
    impl Debug;
    /// Green channel, sent first
    pub green, set_green: 23, 16;
    /// Red channel
    pub red, set_red: 15, 8;
    /// Blue channel, sent last
    pub blue, set_blue: 7, 0;
}

impl GrbWord {
    /// The packed 24-bit value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Scales one channel by `brightness`, truncating toward zero.
#[must_use]
pub fn scale_channel(value: u8, brightness: f32) -> u8 {
    (f32::from(value) * brightness) as u8
}

/// Applies `brightness` to `color` and packs it in wire order.
#[must_use]
pub fn pack_color(color: Color, brightness: f32) -> GrbWord {
    let mut word = GrbWord::default();
    word.set_green(u32::from(scale_channel(color.g(), brightness)));
    word.set_red(u32::from(scale_channel(color.r(), brightness)));
    word.set_blue(u32::from(scale_channel(color.b(), brightness)));
    word
}

/// Encoded frame, ready to be copied into the DMA sample buffer.
#[derive(Clone, PartialEq, Eq)]
#[repr(C, align(4))]
pub struct Waveform {
    words: [u32; WAVEFORM_WORDS],
    bit_len: usize,
}

impl Default for Waveform {
    fn default() -> Self {
        Self::new()
    }
}

impl Waveform {
    /// An idle (all low) waveform.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; WAVEFORM_WORDS],
            bit_len: 0,
        }
    }

    /// Resets every bit to the idle level.
    pub fn clear(&mut self) {
        self.words.fill(0);
        self.bit_len = 0;
    }

    /// Sets wire bit `pos`. Positions past the end of the waveform are ignored.
    pub fn set_bit(&mut self, pos: usize, level: bool) {
        let Some(word) = self.words.get_mut(pos / 32) else {
            return;
        };
        let mask = 1 << (31 - pos % 32);
        if level {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Reads wire bit `pos`. Positions past the end read as idle.
    #[must_use]
    pub fn bit(&self, pos: usize) -> bool {
        self.words
            .get(pos / 32)
            .is_some_and(|word| word & (1 << (31 - pos % 32)) != 0)
    }

    /// Encodes `pixels` at `brightness` and returns the number of wire bits.
    ///
    /// The waveform is cleared first. Pixels that do not fit are dropped.
    pub fn encode(&mut self, pixels: &[Color], brightness: f32) -> usize {
        self.clear();
        let mut pos = 0;
        'pixels: for &pixel in pixels {
            let word = pack_color(pixel, brightness).bits();
            for bit in (0..COLOR_BITS).rev() {
                if pos >= WAVEFORM_BITS {
                    break 'pixels;
                }
                let pattern = if word & (1 << bit) != 0 {
                    ONE_BIT
                } else {
                    ZERO_BIT
                };
                for level in pattern {
                    self.set_bit(pos, level);
                    pos += 1;
                }
            }
        }
        self.bit_len = pos.min(WAVEFORM_BITS);
        self.bit_len
    }

    /// Number of wire bits written by the last [`Waveform::encode`].
    #[must_use]
    pub const fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// The encoded words.
    #[must_use]
    pub const fn words(&self) -> &[u32; WAVEFORM_WORDS] {
        &self.words
    }
}

unsafe impl ReadBuffer for Waveform {
    type Word = u32;

    unsafe fn read_buffer(&self) -> (*const u32, usize) {
        (self.words.as_ptr(), self.words.len())
    }
}

unsafe impl ReadBuffer for &Waveform {
    type Word = u32;

    unsafe fn read_buffer(&self) -> (*const u32, usize) {
        (self.words.as_ptr(), self.words.len())
    }
}

impl core::fmt::Debug for Waveform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Waveform")
            .field("size", &core::mem::size_of_val(&self.words))
            .field("bit_len", &self.bit_len)
            .field("leds", &(self.bit_len / WIRE_BITS_PER_LED))
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Waveform {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Waveform<{}>", WAVEFORM_WORDS);
        defmt::write!(f, " bit_len: {}", self.bit_len);
        defmt::write!(f, " leds: {}", self.bit_len / WIRE_BITS_PER_LED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "100" repeated, i.e. the wire pattern of an all-zero byte stream
    const ZERO_WORDS: [u32; 3] = [0x9249_2492, 0x4924_9249, 0x2492_4924];
    // "110" repeated
    const ONE_WORDS: [u32; 3] = [0xDB6D_B6DB, 0x6DB6_DB6D, 0xB6DB_6DB6];

    fn wire_bits(waveform: &Waveform, start: usize, len: usize) -> String {
        (start..start + len)
            .map(|pos| if waveform.bit(pos) { '1' } else { '0' })
            .collect()
    }

    fn expected_bits(byte: u8) -> String {
        (0..8)
            .rev()
            .map(|bit| if byte & (1 << bit) != 0 { "110" } else { "100" })
            .collect()
    }

    #[test]
    fn test_scale_channel_truncates() {
        assert_eq!(scale_channel(255, 1.0), 255);
        assert_eq!(scale_channel(255, 0.5), 127);
        assert_eq!(scale_channel(3, 0.5), 1);
        assert_eq!(scale_channel(200, 0.0), 0);
        assert_eq!(scale_channel(99, 0.999), 98);
    }

    #[test]
    fn test_pack_color_order() {
        let word = pack_color(Color::new(0x11, 0x22, 0x33), 1.0);
        assert_eq!(word.bits(), 0x0022_1133);
        assert_eq!(word.green(), 0x22);
        assert_eq!(word.red(), 0x11);
        assert_eq!(word.blue(), 0x33);
    }

    #[test]
    fn test_pack_color_brightness() {
        let word = pack_color(Color::new(255, 0, 0), 0.5);
        assert_eq!(word.bits(), 0x0000_7F00);
    }

    #[test]
    fn test_set_and_read_bits_msb_first() {
        let mut waveform = Waveform::new();
        waveform.set_bit(0, true);
        assert_eq!(waveform.words()[0], 0x8000_0000);
        waveform.set_bit(31, true);
        assert_eq!(waveform.words()[0], 0x8000_0001);
        waveform.set_bit(32, true);
        assert_eq!(waveform.words()[1], 0x8000_0000);
        assert!(waveform.bit(0));
        assert!(!waveform.bit(1));
        waveform.set_bit(0, false);
        assert_eq!(waveform.words()[0], 0x0000_0001);
    }

    #[test]
    fn test_bits_past_end_are_ignored() {
        let mut waveform = Waveform::new();
        waveform.set_bit(WAVEFORM_BITS, true);
        assert!(waveform.words().iter().all(|&word| word == 0));
        assert!(!waveform.bit(WAVEFORM_BITS));
    }

    #[test]
    fn test_encode_black() {
        let mut waveform = Waveform::new();
        let bits = waveform.encode(&[Color::new(0, 0, 0); 4], 1.0);
        assert_eq!(bits, 4 * WIRE_BITS_PER_LED);
        // 4 LEDs are 288 wire bits, exactly 9 words
        for (i, &word) in waveform.words()[..9].iter().enumerate() {
            assert_eq!(word, ZERO_WORDS[i % 3]);
        }
        assert!(waveform.words()[9..].iter().all(|&word| word == 0));
    }

    #[test]
    fn test_encode_full_channel() {
        let mut waveform = Waveform::new();
        waveform.encode(&[Color::new(0, 255, 0)], 1.0);
        // green goes first: 8 one-bits, then 16 zero-bits
        assert_eq!(wire_bits(&waveform, 0, 24), "110".repeat(8));
        assert_eq!(wire_bits(&waveform, 24, 48), "100".repeat(16));

        let mut waveform = Waveform::new();
        let white: Vec<Color> = vec![Color::new(255, 255, 255); 4];
        waveform.encode(&white, 1.0);
        for (i, &word) in waveform.words()[..9].iter().enumerate() {
            assert_eq!(word, ONE_WORDS[i % 3]);
        }
    }

    #[test]
    fn test_encode_half_red() {
        let mut waveform = Waveform::new();
        let pixels = [Color::new(255, 0, 0); 10];
        let bits = waveform.encode(&pixels, 0.5);
        assert_eq!(bits, 10 * WIRE_BITS_PER_LED);
        // green 0, red 127 (0b0111_1111), blue 0, then 7 ones of red spill into word 1
        assert_eq!(waveform.words()[0], 0x9249_249B);
        for led in 0..10 {
            let start = led * WIRE_BITS_PER_LED;
            assert_eq!(wire_bits(&waveform, start, 24), expected_bits(0));
            assert_eq!(wire_bits(&waveform, start + 24, 24), expected_bits(127));
            assert_eq!(wire_bits(&waveform, start + 48, 24), expected_bits(0));
        }
        assert_eq!(wire_bits(&waveform, bits, 32), "0".repeat(32));
    }

    #[test]
    fn test_encode_clears_previous_frame() {
        let mut waveform = Waveform::new();
        waveform.encode(&[Color::new(255, 255, 255); 20], 1.0);
        let bits = waveform.encode(&[Color::new(255, 255, 255)], 1.0);
        assert_eq!(bits, WIRE_BITS_PER_LED);
        assert_eq!(waveform.bit_len(), WIRE_BITS_PER_LED);
        assert!(waveform.words()[3..].iter().all(|&word| word == 0));
    }

    #[test]
    fn test_encode_clamps_to_capacity() {
        let mut waveform = Waveform::new();
        let pixels = vec![Color::new(255, 255, 255); 500];
        let bits = waveform.encode(&pixels, 1.0);
        assert_eq!(bits, WAVEFORM_BITS);
        // the last word is still a valid part of the pattern
        assert_ne!(waveform.words()[WAVEFORM_WORDS - 1], 0);
    }

    #[test]
    fn test_encode_empty() {
        let mut waveform = Waveform::new();
        assert_eq!(waveform.encode(&[], 1.0), 0);
        assert!(waveform.words().iter().all(|&word| word == 0));
    }

    #[test]
    fn test_read_buffer() {
        let waveform = Waveform::new();
        let (ptr, len) = unsafe { waveform.read_buffer() };
        assert_eq!(ptr, waveform.words().as_ptr());
        assert_eq!(len, WAVEFORM_WORDS);
    }

    #[test]
    fn test_debug_output() {
        let mut waveform = Waveform::new();
        waveform.encode(&[Color::new(1, 2, 3); 2], 1.0);
        let text = format!("{waveform:?}");
        assert!(text.contains("size: 4064"));
        assert!(text.contains("bit_len: 144"));
        assert!(text.contains("leds: 2"));
    }
}
