//! Register layouts for the BCM2835 DMA, PWM, clock manager and GPIO blocks.
//!
//! Each register the driver touches is a `bitfield!` word type with named
//! fields, so register values are built with setters instead of shifted magic
//! numbers. The [`Register`] trait ties a word type to its offset inside the
//! peripheral window so a [`crate::peripheral::RegisterWindow`] can read and
//! write it by type.
//!
//! Offsets are in 32-bit words from the start of the mapped block.

use bitfield::bitfield;

/// Password that must accompany every clock manager write.
pub const CLOCK_PASSWORD: u32 = 0x5A;

/// DMA data request line of the PWM peripheral.
pub const DREQ_PWM: u32 = 5;

/// Byte length of the DMA channel window.
pub const DMA_WINDOW_LEN: usize = 0x24;
/// Byte length of the PWM window.
pub const PWM_WINDOW_LEN: usize = 0x28;
/// Byte length of the clock manager window (up to the PWM clock divider).
pub const CLOCK_WINDOW_LEN: usize = 0xA8;
/// Byte length of the GPIO window.
pub const GPIO_WINDOW_LEN: usize = 0xB4;

/// DMA control block address register.
pub const DMA_CONBLK_AD: usize = 0x04 / 4;
/// PWM channel 1 range register.
pub const PWM_RNG1: usize = 0x10 / 4;
/// PWM FIFO input register.
pub const PWM_FIF1: usize = 0x18 / 4;
/// First GPIO function select register.
pub const GPIO_FSEL0: usize = 0;

/// A register that lives at a fixed word offset inside its peripheral block.
pub trait Register: Copy + From<u32> + Into<u32> {
    /// Offset of the register from the start of its block, in words.
    const OFFSET: usize;
}

macro_rules! register {
    ($name:ident, $offset:expr) => {
        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl Register for $name {
            const OFFSET: usize = $offset;
        }
    };
}

bitfield! {
    /// DMA channel control and status register (`CS`).
    ///
    /// `INT` and `END` are write-1-to-clear status flags.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DmaCs(u32);
    impl Debug;
    /// Resets the channel (write only)
    pub reset, set_reset: 31;
    /// Aborts the current control block
    pub abort, set_abort: 30;
    /// Keeps running while the debugger pauses
    pub disable_debug, set_disable_debug: 29;
    /// Waits for outstanding writes before finishing a block
    pub wait_for_outstanding_writes, set_wait_for_outstanding_writes: 28;
    /// AXI priority of panicking transfers
    pub panic_priority, set_panic_priority: 23, 20;
    /// AXI priority of normal transfers
    pub priority, set_priority: 19, 16;
    /// An error flag is set in `DEBUG`
    pub error, set_error: 8;
    /// Waiting for outstanding writes
    pub waiting_for_outstanding_writes, set_waiting_for_outstanding_writes: 6;
    /// Paused because the data request line is inactive
    pub dreq_stops_dma, set_dreq_stops_dma: 5;
    /// Channel is paused
    pub paused, set_paused: 4;
    /// State of the selected data request line
    pub dreq, set_dreq: 3;
    /// Interrupt status; write 1 to clear
    pub int, set_int: 2;
    /// Transfer complete; write 1 to clear
    pub end, set_end: 1;
    /// Channel is active; set to start a transfer
    pub active, set_active: 0;
}
register!(DmaCs, 0x00 / 4);

impl DmaCs {
    /// Default priority and panic priority used while a frame streams out.
    pub const PRIORITY: u32 = 8;

    /// Word written to start a transfer: default priorities, wait for
    /// outstanding writes, and the active bit set.
    #[must_use]
    pub fn transfer_start() -> Self {
        let mut cs = Self(0);
        cs.set_wait_for_outstanding_writes(true);
        cs.set_panic_priority(Self::PRIORITY);
        cs.set_priority(Self::PRIORITY);
        cs.set_active(true);
        cs
    }
}

bitfield! {
    /// DMA transfer information word (`TI`), stored in a control block.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DmaTi(u32);
    impl Debug;
    /// Disables wide write bursts
    pub no_wide_bursts, set_no_wide_bursts: 26;
    /// Dummy cycles added after each read or write
    pub waits, set_waits: 25, 21;
    /// Peripheral whose data request paces the transfer
    pub permap, set_permap: 20, 16;
    /// Burst length minus one
    pub burst_length, set_burst_length: 15, 12;
    /// Skips source reads
    pub src_ignore, set_src_ignore: 11;
    /// Source reads are paced by the data request line
    pub src_dreq, set_src_dreq: 10;
    /// 128-bit source reads
    pub src_width, set_src_width: 9;
    /// Increments the source address
    pub src_inc, set_src_inc: 8;
    /// Skips destination writes
    pub dest_ignore, set_dest_ignore: 7;
    /// Destination writes are paced by the data request line
    pub dest_dreq, set_dest_dreq: 6;
    /// 128-bit destination writes
    pub dest_width, set_dest_width: 5;
    /// Increments the destination address
    pub dest_inc, set_dest_inc: 4;
    /// Waits for a write response
    pub wait_resp, set_wait_resp: 3;
    /// 2D transfer mode
    pub tdmode, set_tdmode: 1;
    /// Raises an interrupt when the block completes
    pub inten, set_inten: 0;
}
register!(DmaTi, 0x08 / 4);

impl DmaTi {
    /// Transfer information for streaming memory into the PWM FIFO: no wide
    /// bursts, incrementing source, destination paced by the PWM data request,
    /// wait for write responses, interrupt on completion.
    #[must_use]
    pub fn pwm_stream() -> Self {
        let mut ti = Self(0);
        ti.set_no_wide_bursts(true);
        ti.set_src_inc(true);
        ti.set_dest_dreq(true);
        ti.set_wait_resp(true);
        ti.set_inten(true);
        ti.set_permap(DREQ_PWM);
        ti
    }
}

bitfield! {
    /// DMA debug register. The three low bits are write-1-to-clear error flags.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DmaDebug(u32);
    impl Debug;
    /// Channel is a DMA lite engine
    pub lite, set_lite: 28;
    /// DMA engine version
    pub version, set_version: 27, 25;
    /// Internal engine state machine
    pub dma_state, set_dma_state: 24, 16;
    /// AXI identifier of the channel
    pub dma_id, set_dma_id: 15, 8;
    /// Writes still awaiting a response
    pub outstanding_writes, set_outstanding_writes: 7, 4;
    /// Slave read error; write 1 to clear
    pub read_error, set_read_error: 2;
    /// FIFO error; write 1 to clear
    pub fifo_error, set_fifo_error: 1;
    /// AXI read-last error; write 1 to clear
    pub read_last_not_set, set_read_last_not_set: 0;
}
register!(DmaDebug, 0x20 / 4);

impl DmaDebug {
    /// Word that clears every error flag.
    #[must_use]
    pub fn clear_errors() -> Self {
        let mut debug = Self(0);
        debug.set_read_error(true);
        debug.set_fifo_error(true);
        debug.set_read_last_not_set(true);
        debug
    }
}

bitfield! {
    /// PWM control register (`CTL`).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct PwmCtl(u32);
    impl Debug;
    /// Channel 2 mark-space mode
    pub msen2, set_msen2: 15;
    /// Channel 2 reads from the FIFO
    pub usef2, set_usef2: 13;
    /// Channel 2 output inverted
    pub pola2, set_pola2: 12;
    /// Channel 2 idle level
    pub sbit2, set_sbit2: 11;
    /// Channel 2 repeats the last word when the FIFO is empty
    pub rptl2, set_rptl2: 10;
    /// Channel 2 serializer mode
    pub mode2, set_mode2: 9;
    /// Enables channel 2
    pub pwen2, set_pwen2: 8;
    /// Channel 1 mark-space mode
    pub msen1, set_msen1: 7;
    /// Clears the FIFO (write only)
    pub clrf1, set_clrf1: 6;
    /// Channel 1 reads from the FIFO
    pub usef1, set_usef1: 5;
    /// Channel 1 output inverted
    pub pola1, set_pola1: 4;
    /// Channel 1 idle level
    pub sbit1, set_sbit1: 3;
    /// Channel 1 repeats the last word when the FIFO is empty
    pub rptl1, set_rptl1: 2;
    /// Channel 1 serializer mode
    pub mode1, set_mode1: 1;
    /// Enables channel 1
    pub pwen1, set_pwen1: 0;
}
register!(PwmCtl, 0x00 / 4);

bitfield! {
    /// PWM DMA configuration register (`DMAC`).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct PwmDmac(u32);
    impl Debug;
    /// Enables the DMA request
    pub enable, set_enable: 31;
    /// FIFO level that raises the panic signal
    pub panic, set_panic: 15, 8;
    /// FIFO level that raises the data request
    pub dreq, set_dreq: 7, 0;
}
register!(PwmDmac, 0x08 / 4);

impl PwmDmac {
    /// FIFO threshold used for both the panic and data request signals.
    pub const THRESHOLD: u32 = 8;
}

bitfield! {
    /// PWM clock generator control register (`CM_PWMCTL`).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ClockCtl(u32);
    impl Debug;
    /// Must be `0x5A` for a write to take effect
    pub password, set_password: 31, 24;
    /// MASH noise-shaping stages
    pub mash, set_mash: 10, 9;
    /// Inverts the clock output
    pub flip, set_flip: 8;
    /// Clock generator is running
    pub busy, set_busy: 7;
    /// Stops the clock generator
    pub kill, set_kill: 5;
    /// Starts the clock generator
    pub enable, set_enable: 4;
    /// Clock source
    pub source, set_source: 3, 0;
}
register!(ClockCtl, 40);

impl ClockCtl {
    /// A control word carrying the clock manager password.
    #[must_use]
    pub fn with_password() -> Self {
        let mut ctl = Self(0);
        ctl.set_password(CLOCK_PASSWORD);
        ctl
    }
}

bitfield! {
    /// PWM clock generator divider register (`CM_PWMDIV`).
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct ClockDiv(u32);
    impl Debug;
    /// Must be `0x5A` for a write to take effect
    pub password, set_password: 31, 24;
    /// Integer part of the divisor
    pub divi, set_divi: 23, 12;
    /// Fractional part of the divisor
    pub divf, set_divf: 11, 0;
}
register!(ClockDiv, 41);

/// GPIO pin functions as encoded in the function select registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum GpioFunction {
    /// Plain input
    Input = 0b000,
    /// Plain output
    Output = 0b001,
    /// Alternate function 0
    Alt0 = 0b100,
    /// Alternate function 1
    Alt1 = 0b101,
    /// Alternate function 2
    Alt2 = 0b110,
    /// Alternate function 3
    Alt3 = 0b111,
    /// Alternate function 4
    Alt4 = 0b011,
    /// Alternate function 5
    Alt5 = 0b010,
}

/// Word offset of the function select register holding `pin`.
#[must_use]
pub const fn gpio_fsel_offset(pin: u32) -> usize {
    GPIO_FSEL0 + (pin / 10) as usize
}

/// Returns `fsel` with the three function bits of `pin` replaced by `function`.
#[must_use]
pub const fn select_function(fsel: u32, pin: u32, function: GpioFunction) -> u32 {
    let shift = (pin % 10) * 3;
    (fsel & !(0b111 << shift)) | ((function as u32) << shift)
}
