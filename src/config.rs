//! Platform configuration: where the peripherals live and how the PWM output
//! is clocked.
//!
//! The defaults reproduce the original Raspberry Pi 1 (BCM2835) setup: DMA
//! channel 0, GPIO 18 in alternate function 5, and the PWM clock fed from
//! PLLC divided by 400, which gives a 2.5 MHz bit clock (0.4 µs per wire bit).

use crate::registers::{GpioFunction, PWM_FIF1};
use crate::Error;

/// Offset of DMA channel 0 from the peripheral base.
const DMA_OFFSET: u32 = 0x0000_7000;
/// Distance between consecutive DMA channel register blocks.
const DMA_CHANNEL_STRIDE: u32 = 0x100;
/// Offset of the PWM block from the peripheral base.
const PWM_OFFSET: u32 = 0x0020_C000;
/// Offset of the clock manager from the peripheral base.
const CLOCK_OFFSET: u32 = 0x0010_1000;
/// Offset of the GPIO block from the peripheral base.
const GPIO_OFFSET: u32 = 0x0020_0000;
/// Peripheral base as seen by the DMA engine on the VideoCore bus.
const BUS_PERIPHERAL_BASE: u32 = 0x7E00_0000;

/// Highest DMA channel that lives in the contiguous channel block.
pub const MAX_DMA_CHANNEL: u8 = 14;
/// Largest integer divisor the clock manager accepts.
pub const MAX_CLOCK_DIVISOR: u16 = 0xFFF;

/// GPIO pins that can carry PWM channel 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmPin {
    /// GPIO 12, alternate function 0
    Gpio12,
    /// GPIO 18, alternate function 5 (header pin 12)
    Gpio18,
}

impl PwmPin {
    /// BCM GPIO number of the pin.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::Gpio12 => 12,
            Self::Gpio18 => 18,
        }
    }

    /// Alternate function that routes PWM channel 1 to the pin.
    #[must_use]
    pub const fn function(self) -> GpioFunction {
        match self {
            Self::Gpio12 => GpioFunction::Alt0,
            Self::Gpio18 => GpioFunction::Alt5,
        }
    }
}

/// Clock sources of the clock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum ClockSource {
    /// 19.2 MHz crystal oscillator
    Oscillator = 1,
    /// PLLA
    PllA = 4,
    /// PLLC
    PllC = 5,
    /// PLLD
    PllD = 6,
    /// HDMI auxiliary
    HdmiAux = 7,
}

/// Driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// ARM physical address of the peripheral block.
    pub peripheral_base: u32,
    /// Bus alias OR-ed into page frame addresses handed to the DMA engine.
    pub bus_alias: u32,
    /// DMA channel used for the transfer.
    pub dma_channel: u8,
    /// Output pin.
    pub pin: PwmPin,
    /// PWM clock source.
    pub clock_source: ClockSource,
    /// Integer divisor applied to the clock source.
    pub clock_divisor: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self::bcm2835()
    }
}

impl Config {
    /// Raspberry Pi 1 / Zero.
    #[must_use]
    pub const fn bcm2835() -> Self {
        Self {
            peripheral_base: 0x2000_0000,
            bus_alias: 0x4000_0000,
            dma_channel: 0,
            pin: PwmPin::Gpio18,
            clock_source: ClockSource::PllC,
            clock_divisor: 400,
        }
    }

    /// Raspberry Pi 2 / 3.
    #[must_use]
    pub const fn bcm2836() -> Self {
        Self {
            peripheral_base: 0x3F00_0000,
            bus_alias: 0xC000_0000,
            ..Self::bcm2835()
        }
    }

    /// Use a different DMA channel.
    #[must_use]
    pub const fn with_dma_channel(mut self, channel: u8) -> Self {
        self.dma_channel = channel;
        self
    }

    /// Use a different output pin.
    #[must_use]
    pub const fn with_pin(mut self, pin: PwmPin) -> Self {
        self.pin = pin;
        self
    }

    /// Use a different PWM clock source and divisor.
    #[must_use]
    pub const fn with_clock(mut self, source: ClockSource, divisor: u16) -> Self {
        self.clock_source = source;
        self.clock_divisor = divisor;
        self
    }

    /// Physical address of the selected DMA channel's registers.
    #[must_use]
    pub const fn dma_base(&self) -> u32 {
        self.peripheral_base + DMA_OFFSET + self.dma_channel as u32 * DMA_CHANNEL_STRIDE
    }

    /// Physical address of the PWM registers.
    #[must_use]
    pub const fn pwm_base(&self) -> u32 {
        self.peripheral_base + PWM_OFFSET
    }

    /// Physical address of the clock manager registers.
    #[must_use]
    pub const fn clock_base(&self) -> u32 {
        self.peripheral_base + CLOCK_OFFSET
    }

    /// Physical address of the GPIO registers.
    #[must_use]
    pub const fn gpio_base(&self) -> u32 {
        self.peripheral_base + GPIO_OFFSET
    }

    /// Bus address of the PWM FIFO, the destination of every transfer.
    #[must_use]
    pub const fn pwm_fifo_bus_address(&self) -> u32 {
        BUS_PERIPHERAL_BASE + PWM_OFFSET + (PWM_FIF1 as u32) * 4
    }

    /// Checks that the configuration names hardware that exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a DMA channel above
    /// [`MAX_DMA_CHANNEL`] or a clock divisor outside `1..=MAX_CLOCK_DIVISOR`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.dma_channel > MAX_DMA_CHANNEL {
            return Err(Error::InvalidConfig("DMA channel must be 0..=14"));
        }
        if self.clock_divisor == 0 || self.clock_divisor > MAX_CLOCK_DIVISOR {
            return Err(Error::InvalidConfig("clock divisor must be 1..=4095"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcm2835_addresses() {
        let config = Config::default();
        assert_eq!(config, Config::bcm2835());
        assert_eq!(config.dma_base(), 0x2000_7000);
        assert_eq!(config.pwm_base(), 0x2020_C000);
        assert_eq!(config.clock_base(), 0x2010_1000);
        assert_eq!(config.gpio_base(), 0x2020_0000);
        assert_eq!(config.pwm_fifo_bus_address(), 0x7E20_C018);
        assert_eq!(config.bus_alias, 0x4000_0000);
    }

    #[test]
    fn test_bcm2836_addresses() {
        let config = Config::bcm2836();
        assert_eq!(config.dma_base(), 0x3F00_7000);
        assert_eq!(config.pwm_base(), 0x3F20_C000);
        assert_eq!(config.bus_alias, 0xC000_0000);
        // the bus view of the peripherals does not move between boards
        assert_eq!(config.pwm_fifo_bus_address(), 0x7E20_C018);
        assert_eq!(config.pin, PwmPin::Gpio18);
    }

    #[test]
    fn test_dma_channel_stride() {
        let config = Config::bcm2835().with_dma_channel(5);
        assert_eq!(config.dma_base(), 0x2000_7500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config::bcm2835().with_dma_channel(15);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config::bcm2835().with_clock(ClockSource::PllD, 0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config::bcm2835().with_clock(ClockSource::PllD, 4096);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = Config::bcm2835().with_clock(ClockSource::PllD, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pwm_pins() {
        assert_eq!(PwmPin::Gpio18.number(), 18);
        assert_eq!(PwmPin::Gpio18.function(), GpioFunction::Alt5);
        assert_eq!(PwmPin::Gpio12.number(), 12);
        assert_eq!(PwmPin::Gpio12.function(), GpioFunction::Alt0);
    }
}
