//! DMA transfer controller.
//!
//! Owns the four register windows and the locked control page, and drives one
//! frame out of the PWM serializer per [`DmaController::transfer`]:
//!
//! 1. the encoded words are copied into the sample buffer of the control page,
//! 2. the channel is pointed at the control block and started,
//! 3. PWM channel 1 is enabled and pulls words from its FIFO, paced by its data
//!    request line,
//! 4. the caller sleeps for the time the whole sample buffer takes on the wire.
//!
//! The control page is laid out as [`ControlData`]: a 32-byte control block
//! followed by the sample buffer, exactly one page.
//!
//! ```text
//! Uninitialized -> Configured -> Idle -> (Transferring -> Idle)* -> Terminated
//! ```

use core::mem::size_of;
use core::ptr;
use std::thread;
use std::time::Duration;

use embedded_dma::ReadBuffer;
use log::{debug, info, trace, warn};

use crate::config::Config;
use crate::lifecycle::{self, InstanceGuard};
use crate::pagemap::{PageTable, PAGE_SIZE};
use crate::peripheral::{map_peripheral, RegisterWindow};
use crate::registers::{
    gpio_fsel_offset, select_function, ClockCtl, ClockDiv, DmaCs, DmaDebug, DmaTi, PwmCtl,
    PwmDmac, CLOCK_PASSWORD, CLOCK_WINDOW_LEN, DMA_CONBLK_AD, DMA_WINDOW_LEN, GPIO_WINDOW_LEN,
    PWM_RNG1, PWM_WINDOW_LEN,
};
use crate::waveform::WAVEFORM_WORDS;
use crate::{compute_drain_time, compute_transfer_words, Error};

/// Delay after each register write that the hardware needs to settle.
pub const SETTLE: Duration = Duration::from_micros(100);

/// Bits the PWM serializer shifts out of each FIFO word.
pub const PWM_RANGE: u32 = 32;

/// Pages holding the [`ControlData`].
pub const CONTROL_DATA_PAGES: usize = size_of::<ControlData>().div_ceil(PAGE_SIZE);

pub(crate) fn settle() {
    thread::sleep(SETTLE);
}

/// A DMA control block as the engine reads it from memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, align(32))]
pub struct ControlBlock {
    /// Transfer information
    pub info: DmaTi,
    /// Bus address of the first source word
    pub source: u32,
    /// Bus address of the destination
    pub destination: u32,
    /// Transfer length in bytes
    pub length: u32,
    /// 2D stride, unused
    pub stride: u32,
    /// Bus address of the next control block, zero to stop
    pub next: u32,
    pad: [u32; 2],
}

/// Contents of the locked control page.
#[repr(C)]
pub struct ControlData {
    /// The only control block
    pub cb: ControlBlock,
    /// Words streamed into the PWM FIFO
    pub sample: [u32; WAVEFORM_WORDS],
}

/// Where a [`DmaController`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    /// Resources acquired, hardware not set up yet
    Uninitialized,
    /// Registers programmed; passes to `Idle` as construction finishes
    Configured,
    /// A frame is on the wire
    Transferring,
    /// Ready for a frame; the last one, if any, has drained
    Idle,
    /// Hardware stopped and the control page released
    Terminated,
}

/// The register windows the driver programs.
#[derive(Debug)]
pub struct Peripherals {
    /// DMA channel registers
    pub dma: RegisterWindow,
    /// PWM controller registers
    pub pwm: RegisterWindow,
    /// Clock manager registers
    pub clock: RegisterWindow,
    /// GPIO registers
    pub gpio: RegisterWindow,
}

impl Peripherals {
    /// Maps all four windows for `config`.
    ///
    /// # Errors
    ///
    /// Fatal mapping errors from [`map_peripheral`].
    pub fn map(config: &Config) -> Result<Self, Error> {
        Ok(Self {
            dma: map_peripheral(config.dma_base(), DMA_WINDOW_LEN)?,
            pwm: map_peripheral(config.pwm_base(), PWM_WINDOW_LEN)?,
            clock: map_peripheral(config.clock_base(), CLOCK_WINDOW_LEN)?,
            gpio: map_peripheral(config.gpio_base(), GPIO_WINDOW_LEN)?,
        })
    }
}

/// Streams encoded frames to the PWM serializer over one DMA channel.
#[derive(Debug)]
pub struct DmaController {
    peripherals: Peripherals,
    pages: Option<PageTable>,
    transfer_words: usize,
    state: TransferState,
    // released after Drop has stopped the hardware
    _guard: Option<InstanceGuard>,
}

impl DmaController {
    /// Claims the process-wide driver slot, maps the peripherals, locks the
    /// control page and sets up the hardware for a strip of `led_count` LEDs.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInUse`] while another controller is alive, before any
    /// hardware is touched. [`Error::InvalidConfig`] for a bad `config`;
    /// everything else is fatal.
    pub fn configure(config: &Config, led_count: usize) -> Result<Self, Error> {
        let guard = InstanceGuard::acquire()?;
        config.validate()?;
        let peripherals = Peripherals::map(config)?;
        let pages = PageTable::allocate(CONTROL_DATA_PAGES, config.bus_alias)?;
        let mut controller = Self::with_parts(config, peripherals, pages, led_count)?;
        controller._guard = Some(guard);
        Ok(controller)
    }

    /// Sets up the hardware through windows and pages the caller provides.
    ///
    /// The process-wide driver slot is not claimed; the caller owns the
    /// windows and decides who else may program them.
    ///
    /// # Errors
    ///
    /// [`Error::AddressOutOfRange`] if `pages` cannot hold the control data.
    pub fn with_parts(
        config: &Config,
        peripherals: Peripherals,
        pages: PageTable,
        led_count: usize,
    ) -> Result<Self, Error> {
        if pages.len_bytes() < size_of::<ControlData>() {
            return Err(Error::AddressOutOfRange(
                pages.as_mut_ptr() as usize + size_of::<ControlData>(),
            ));
        }

        let mut controller = Self {
            peripherals,
            pages: Some(pages),
            transfer_words: compute_transfer_words(led_count),
            state: TransferState::Uninitialized,
            _guard: None,
        };
        // on error, dropping the controller quiesces whatever was touched
        controller.setup(config)?;
        controller.state = TransferState::Configured;
        info!(
            "DMA channel {} configured: {} words per frame",
            config.dma_channel, controller.transfer_words
        );
        controller.state = TransferState::Idle;
        Ok(controller)
    }

    fn control_data(&self) -> Result<(&PageTable, *mut ControlData), Error> {
        let pages = self.pages.as_ref().ok_or(Error::Terminated)?;
        Ok((pages, pages.as_mut_ptr().cast::<ControlData>()))
    }

    fn setup(&self, config: &Config) -> Result<(), Error> {
        let regs = &self.peripherals;
        let (pages, data) = self.control_data()?;

        let pin = config.pin.number();
        let fsel = gpio_fsel_offset(pin);
        regs.gpio
            .write(fsel, select_function(regs.gpio.read(fsel), pin, config.pin.function()));

        // SAFETY: the page table holds at least one ControlData at its base.
        let sample = unsafe { ptr::addr_of!((*data).sample) };
        let cb = ControlBlock {
            info: DmaTi::pwm_stream(),
            source: pages.virt_to_phys(sample)?,
            destination: config.pwm_fifo_bus_address(),
            length: (self.transfer_words * 4) as u32,
            stride: 0,
            next: 0,
            pad: [0; 2],
        };
        // SAFETY: as above; the engine is stopped, nothing else reads it.
        unsafe { ptr::addr_of_mut!((*data).cb).write_volatile(cb) };
        debug!("control block: {cb:?}");

        regs.dma.modify::<DmaCs>(|cs| cs.set_abort(true));
        settle();
        let mut cs = DmaCs::default();
        cs.set_reset(true);
        regs.dma.set(cs);
        settle();

        let mut ctl = ClockCtl::with_password();
        ctl.set_kill(true);
        regs.clock.set(ctl);
        settle();
        regs.pwm.modify::<PwmDmac>(|dmac| dmac.set_enable(false));
        settle();
        let mut div = ClockDiv::default();
        div.set_password(CLOCK_PASSWORD);
        div.set_divi(u32::from(config.clock_divisor));
        regs.clock.set(div);
        settle();
        let mut ctl = ClockCtl::with_password();
        ctl.set_enable(true);
        ctl.set_source(config.clock_source as u32);
        regs.clock.set(ctl);
        settle();

        regs.pwm.set(PwmCtl::default());
        regs.pwm.write(PWM_RNG1, PWM_RANGE);
        settle();
        let mut dmac = PwmDmac::default();
        dmac.set_enable(true);
        dmac.set_panic(PwmDmac::THRESHOLD);
        dmac.set_dreq(PwmDmac::THRESHOLD);
        regs.pwm.set(dmac);
        thread::sleep(SETTLE * 10);

        regs.pwm.modify::<PwmCtl>(|ctl| ctl.set_clrf1(true));
        settle();
        regs.pwm.modify::<PwmCtl>(|ctl| {
            ctl.set_clrf1(false);
            ctl.set_rptl1(false);
            ctl.set_sbit1(false);
            ctl.set_pola1(false);
            ctl.set_mode1(true);
            ctl.set_usef1(true);
            ctl.set_msen1(false);
        });
        settle();

        regs.dma.modify::<DmaCs>(|cs| {
            cs.set_int(true);
            cs.set_end(true);
        });
        settle();
        regs.dma.write(DMA_CONBLK_AD, pages.virt_to_phys(data.cast_const())?);
        regs.dma.set(DmaDebug::clear_errors());
        settle();
        Ok(())
    }

    /// Sends one frame and blocks until it has drained.
    ///
    /// The first [`compute_transfer_words`] words of `buffer` are copied into
    /// the sample buffer; missing words are sent as zero.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] after [`Self::terminate`].
    pub fn transfer<B>(&mut self, buffer: &B) -> Result<(), Error>
    where
        B: ReadBuffer<Word = u32>,
    {
        if self.state == TransferState::Terminated {
            return Err(Error::Terminated);
        }
        let (pages, data) = self.control_data()?;
        let cb_addr = pages.virt_to_phys(data.cast_const())?;

        // SAFETY: ReadBuffer guarantees `len` readable words that stay put
        // while `buffer` is borrowed.
        let (words, len) = unsafe { buffer.read_buffer() };
        // SAFETY: the sample buffer is inside the control page.
        let sample = unsafe { ptr::addr_of_mut!((*data).sample) }.cast::<u32>();
        for i in 0..self.transfer_words {
            // SAFETY: i < transfer_words <= WAVEFORM_WORDS, and i < len on
            // the source side.
            unsafe {
                let word = if i < len { words.add(i).read() } else { 0 };
                sample.add(i).write_volatile(word);
            }
        }

        let regs = &self.peripherals;
        regs.dma.write(DMA_CONBLK_AD, cb_addr);
        regs.dma.set(DmaCs::transfer_start());
        settle();
        regs.pwm.modify::<PwmCtl>(|ctl| ctl.set_pwen1(true));
        self.state = TransferState::Transferring;
        trace!("frame of {} words started", self.transfer_words);

        thread::sleep(compute_drain_time());

        let cs = self.peripherals.dma.get::<DmaCs>();
        if cs.error() {
            warn!("DMA channel reported an error after the frame: {cs:?}");
        }
        self.state = TransferState::Idle;
        Ok(())
    }

    /// Stops the DMA channel and the PWM output and releases the control
    /// page. Later calls do nothing.
    pub fn terminate(&mut self) {
        if self.state == TransferState::Terminated {
            return;
        }
        let (dma, pwm) = self.register_bases();
        // SAFETY: both windows are mapped for as long as self lives.
        unsafe { lifecycle::quiesce(dma, pwm) };
        self.pages = None;
        self.state = TransferState::Terminated;
        info!("DMA transfer terminated");
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TransferState {
        self.state
    }

    /// Words sent per frame.
    #[must_use]
    pub const fn transfer_words(&self) -> usize {
        self.transfer_words
    }

    /// First registers of the DMA channel and PWM windows.
    #[must_use]
    pub const fn register_bases(&self) -> (*mut u32, *mut u32) {
        (self.peripherals.dma.as_ptr(), self.peripherals.pwm.as_ptr())
    }

    /// The control block as last written, until termination.
    #[must_use]
    pub fn control_block(&self) -> Option<ControlBlock> {
        let (_, data) = self.control_data().ok()?;
        // SAFETY: the control page is still mapped.
        Some(unsafe { ptr::addr_of!((*data).cb).read_volatile() })
    }

    /// Page table of the control page, until termination.
    #[must_use]
    pub const fn page_table(&self) -> Option<&PageTable> {
        self.pages.as_ref()
    }
}

impl Drop for DmaController {
    fn drop(&mut self) {
        self.terminate();
    }
}
