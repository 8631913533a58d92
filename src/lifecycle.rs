//! Driver lifecycle and fault handling.
//!
//! The register windows and the locked DMA memory are process-wide resources,
//! so only one driver may be live at a time ([`InstanceGuard`]). Whatever
//! happens to the process, the DMA engine and the PWM output must be left
//! stopped:
//! - normal teardown quiesces them from `Drop`,
//! - termination signals quiesce the registered windows from a signal handler
//!   and then re-raise the signal,
//! - fatal errors are logged, quiesce the registered windows and exit
//!   ([`escalate`]).

use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Once;

use log::{debug, error, warn};

use crate::dma::settle;
use crate::registers::{DmaCs, PwmCtl, Register};
use crate::Error;

static LIVE: AtomicBool = AtomicBool::new(false);

static DMA_REGS: AtomicPtr<u32> = AtomicPtr::new(ptr::null_mut());
static PWM_REGS: AtomicPtr<u32> = AtomicPtr::new(ptr::null_mut());

static SIGNAL_HANDLERS: Once = Once::new();

const TERMINATION_SIGNALS: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

/// Claim on the process-wide driver slot, released on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    flag: &'static AtomicBool,
}

impl InstanceGuard {
    /// Claims the driver slot.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInUse`] while another guard is alive.
    pub fn acquire() -> Result<Self, Error> {
        Self::acquire_flag(&LIVE)
    }

    pub(crate) fn acquire_flag(flag: &'static AtomicBool) -> Result<Self, Error> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyInUse)?;
        Ok(Self { flag })
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Stops the DMA channel and the PWM output.
///
/// Clears the DMA active bit and resets the channel, then disables PWM
/// channel 1 and clears its FIFO. Null pointers are skipped.
///
/// # Safety
///
/// Non-null pointers must point at mapped DMA channel and PWM register blocks.
pub unsafe fn quiesce(dma: *mut u32, pwm: *mut u32) {
    if let Some(dma) = NonNull::new(dma) {
        let cs = dma.as_ptr().add(DmaCs::OFFSET);
        let mut value = DmaCs::from(cs.read_volatile());
        value.set_active(false);
        cs.write_volatile(value.into());
        settle();

        let mut value = DmaCs::from(cs.read_volatile());
        value.set_reset(true);
        cs.write_volatile(value.into());
        settle();
    }

    if let Some(pwm) = NonNull::new(pwm) {
        let ctl = pwm.as_ptr().add(PwmCtl::OFFSET);
        let mut value = PwmCtl::from(ctl.read_volatile());
        value.set_pwen1(false);
        ctl.write_volatile(value.into());
        settle();

        let mut value = PwmCtl::default();
        value.set_clrf1(true);
        ctl.write_volatile(value.into());
    }
}

/// Registers the windows that signal and fatal paths must quiesce.
pub(crate) fn register_quiesce(dma: *mut u32, pwm: *mut u32) {
    DMA_REGS.store(dma, Ordering::Release);
    PWM_REGS.store(pwm, Ordering::Release);
}

/// Forgets the registered windows, before they are unmapped.
pub(crate) fn unregister_quiesce() {
    DMA_REGS.store(ptr::null_mut(), Ordering::Release);
    PWM_REGS.store(ptr::null_mut(), Ordering::Release);
}

#[cfg(test)]
pub(crate) static REGISTRY_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
pub(crate) fn registered_bases() -> (*mut u32, *mut u32) {
    (
        DMA_REGS.load(Ordering::Acquire),
        PWM_REGS.load(Ordering::Acquire),
    )
}

/// Quiesces the registered windows, at most once per registration.
pub fn quiesce_registered() {
    let dma = DMA_REGS.swap(ptr::null_mut(), Ordering::AcqRel);
    let pwm = PWM_REGS.swap(ptr::null_mut(), Ordering::AcqRel);
    // SAFETY: registered pointers are unregistered before their windows are
    // unmapped, so anything still here is mapped.
    unsafe { quiesce(dma, pwm) };
}

extern "C" fn on_termination_signal(signal: libc::c_int) {
    quiesce_registered();
    // SAFETY: signal() and raise() are async-signal-safe; the default action
    // ends the process with the original signal.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        libc::raise(signal);
    }
}

/// Installs handlers that quiesce the hardware on SIGINT, SIGTERM, SIGHUP and
/// SIGQUIT. Only the first call has an effect.
pub fn install_signal_handlers() {
    SIGNAL_HANDLERS.call_once(|| {
        for signal in TERMINATION_SIGNALS {
            // SAFETY: a zeroed sigaction with an empty mask and a plain
            // handler is a valid argument to sigaction().
            let installed = unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction =
                    on_termination_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(signal, &action, ptr::null_mut()) == 0
            };
            if !installed {
                warn!(
                    "failed to install handler for signal {signal}: {}",
                    io::Error::last_os_error()
                );
            }
        }
        debug!("termination signal handlers installed");
    });
}

/// Logs `error`, quiesces the registered hardware and ends the process.
pub fn escalate(error: &Error) -> ! {
    error!("fatal: {error}");
    quiesce_registered();
    std::process::exit(1)
}

/// Ends the process through [`escalate`] instead of returning an error.
pub trait OrEscalate<T> {
    /// Returns the value or escalates the error.
    fn or_escalate(self) -> T;
}

impl<T> OrEscalate<T> for Result<T, Error> {
    fn or_escalate(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => escalate(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_SLOT: AtomicBool = AtomicBool::new(false);

    #[test]
    fn test_single_instance() {
        let first = InstanceGuard::acquire_flag(&TEST_SLOT).unwrap();
        assert!(matches!(
            InstanceGuard::acquire_flag(&TEST_SLOT),
            Err(Error::AlreadyInUse)
        ));
        drop(first);
        let again = InstanceGuard::acquire_flag(&TEST_SLOT);
        assert!(again.is_ok());
    }

    fn running_registers() -> ([u32; 9], [u32; 10]) {
        let mut dma = [0u32; 9];
        dma[0] = DmaCs::transfer_start().into();
        let mut pwm = [0u32; 10];
        let mut ctl = PwmCtl::default();
        ctl.set_mode1(true);
        ctl.set_usef1(true);
        ctl.set_pwen1(true);
        pwm[0] = ctl.into();
        (dma, pwm)
    }

    fn assert_quiesced(dma: &[u32], pwm: &[u32]) {
        let cs = DmaCs::from(dma[0]);
        assert!(!cs.active());
        assert!(cs.reset());
        let ctl = PwmCtl::from(pwm[0]);
        assert!(!ctl.pwen1());
        assert_eq!(pwm[0], 1 << 6);
    }

    #[test]
    fn test_quiesce() {
        let (mut dma, mut pwm) = running_registers();
        unsafe { quiesce(dma.as_mut_ptr(), pwm.as_mut_ptr()) };
        assert_quiesced(&dma, &pwm);
    }

    #[test]
    fn test_quiesce_skips_null() {
        unsafe { quiesce(ptr::null_mut(), ptr::null_mut()) };

        let (_, mut pwm) = running_registers();
        unsafe { quiesce(ptr::null_mut(), pwm.as_mut_ptr()) };
        assert_eq!(pwm[0], 1 << 6);
    }

    // The registry is process-wide; tests that touch it hold REGISTRY_LOCK.
    #[test]
    fn test_registered_quiesce() {
        let _registry = REGISTRY_LOCK
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (mut dma, mut pwm) = running_registers();
        register_quiesce(dma.as_mut_ptr(), pwm.as_mut_ptr());
        quiesce_registered();
        assert_quiesced(&dma, &pwm);

        // a second run finds nothing registered and leaves the words alone
        dma[0] = 0;
        pwm[0] = 0;
        quiesce_registered();
        assert_eq!(dma[0], 0);
        assert_eq!(pwm[0], 0);

        let (mut dma, mut pwm) = running_registers();
        let before = (dma, pwm);
        register_quiesce(dma.as_mut_ptr(), pwm.as_mut_ptr());
        unregister_quiesce();
        quiesce_registered();
        assert_eq!((dma, pwm), before);
    }

    #[test]
    fn test_install_signal_handlers_is_idempotent() {
        install_signal_handlers();
        install_signal_handlers();
        assert!(SIGNAL_HANDLERS.is_completed());
    }
}
