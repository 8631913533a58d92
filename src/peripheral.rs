//! Mapping of physical register windows into the process.
//!
//! [`map_peripheral`] opens `/dev/mem`, maps the requested window as shared
//! memory and closes the device again; the mapping outlives the descriptor.
//! The result is a [`RegisterWindow`] that performs volatile 32-bit accesses
//! and unmaps itself on drop.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};
use std::{fmt, io};

use log::debug;

use crate::pagemap::PAGE_SIZE;
use crate::registers::Register;
use crate::Error;

const DEV_MEM: &str = "/dev/mem";

/// Owned `mmap` of a physical window.
struct Mapping {
    addr: NonNull<libc::c_void>,
    len: usize,
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: addr/len are exactly what mmap returned and nothing else
        // unmaps them.
        unsafe {
            libc::munmap(self.addr.as_ptr(), self.len);
        }
    }
}

/// A window of memory-mapped 32-bit registers.
///
/// All accesses are volatile. Offsets are in words and are checked against the
/// window length.
pub struct RegisterWindow {
    base: NonNull<u32>,
    words: usize,
    mapping: Option<Mapping>,
}

impl RegisterWindow {
    /// Wraps existing memory as a register window without taking ownership.
    ///
    /// # Safety
    ///
    /// `base` must be valid for volatile reads and writes of `words` aligned
    /// `u32`s for as long as the window is used.
    #[must_use]
    pub unsafe fn from_raw_parts(base: NonNull<u32>, words: usize) -> Self {
        Self {
            base,
            words,
            mapping: None,
        }
    }

    /// Number of 32-bit registers in the window.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.words
    }

    /// Returns `true` if the window holds no registers.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.words == 0
    }

    /// Pointer to the first register of the window.
    #[must_use]
    pub const fn as_ptr(&self) -> *mut u32 {
        self.base.as_ptr()
    }

    fn register(&self, offset: usize) -> *mut u32 {
        assert!(
            offset < self.words,
            "register offset {offset} outside a window of {} words",
            self.words
        );
        // SAFETY: offset was checked against the window length above.
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// Reads the raw register at `offset`.
    #[must_use]
    pub fn read(&self, offset: usize) -> u32 {
        // SAFETY: the pointer is inside the window, which is valid for reads.
        unsafe { self.register(offset).read_volatile() }
    }

    /// Writes the raw register at `offset`.
    pub fn write(&self, offset: usize, value: u32) {
        // SAFETY: the pointer is inside the window, which is valid for writes.
        unsafe { self.register(offset).write_volatile(value) }
    }

    /// Reads a typed register.
    #[must_use]
    pub fn get<R: Register>(&self) -> R {
        R::from(self.read(R::OFFSET))
    }

    /// Writes a typed register.
    pub fn set<R: Register>(&self, value: R) {
        self.write(R::OFFSET, value.into());
    }

    /// Read-modify-write of a typed register.
    pub fn modify<R: Register>(&self, f: impl FnOnce(&mut R)) {
        let mut value = self.get::<R>();
        f(&mut value);
        self.set(value);
    }
}

impl fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("base", &self.base)
            .field("words", &self.words)
            .field("mapped", &self.mapping.is_some())
            .finish()
    }
}

/// Maps `len` bytes of physical memory starting at `base`.
///
/// `base` does not need to be page aligned; the enclosing pages are mapped and
/// the window starts at the requested address.
///
/// # Errors
///
/// [`Error::Open`] if `/dev/mem` cannot be opened (usually missing root), or
/// [`Error::MapPeripheral`] if the mapping fails. Both are fatal.
pub fn map_peripheral(base: u32, len: usize) -> Result<RegisterWindow, Error> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open(DEV_MEM)
        .map_err(|source| Error::Open {
            path: DEV_MEM,
            source,
        })?;

    let page_mask = PAGE_SIZE as u32 - 1;
    let page_base = base & !page_mask;
    let lead = (base & page_mask) as usize;
    let map_len = lead + len;

    // SAFETY: a fresh shared mapping of the device; the kernel validates the
    // offset and length.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            page_base as libc::off_t,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(Error::MapPeripheral {
            base,
            source: io::Error::last_os_error(),
        });
    }
    let mapping = Mapping {
        addr: NonNull::new(addr).ok_or_else(|| Error::MapPeripheral {
            base,
            source: io::Error::from(io::ErrorKind::AddrNotAvailable),
        })?,
        len: map_len,
    };
    drop(file);

    // SAFETY: lead < PAGE_SIZE <= map_len, so the offset stays in the mapping.
    let window = unsafe { mapping.addr.as_ptr().cast::<u8>().add(lead) }.cast::<u32>();
    debug!("mapped peripheral {base:#010x} (+{len:#x}) at {window:p}");

    Ok(RegisterWindow {
        base: NonNull::new(window).ok_or(Error::AddressOutOfRange(0))?,
        words: len / 4,
        mapping: Some(mapping),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{DmaCs, PwmCtl};

    fn window(storage: &mut [u32]) -> RegisterWindow {
        let base = NonNull::new(storage.as_mut_ptr()).unwrap();
        unsafe { RegisterWindow::from_raw_parts(base, storage.len()) }
    }

    #[test]
    fn test_raw_read_write() {
        let mut storage = [0u32; 4];
        let regs = window(&mut storage);
        regs.write(2, 0xDEAD_BEEF);
        assert_eq!(regs.read(2), 0xDEAD_BEEF);
        assert_eq!(regs.read(0), 0);
        assert_eq!(regs.len(), 4);
        assert!(!regs.is_empty());
        drop(regs);
        assert_eq!(storage[2], 0xDEAD_BEEF);
    }

    #[test]
    fn test_typed_access() {
        let mut storage = [0u32; 9];
        let regs = window(&mut storage);
        regs.set(DmaCs::transfer_start());
        assert!(regs.get::<DmaCs>().active());
        regs.modify::<DmaCs>(|cs| cs.set_active(false));
        let cs = regs.get::<DmaCs>();
        assert!(!cs.active());
        assert_eq!(cs.priority(), 8);
    }

    #[test]
    fn test_modify_preserves_other_bits() {
        let mut storage = [0b10_0010u32; 10];
        let regs = window(&mut storage);
        regs.modify::<PwmCtl>(|ctl| ctl.set_pwen1(true));
        assert_eq!(regs.read(0), 0b10_0011);
    }

    #[test]
    #[should_panic(expected = "outside a window")]
    fn test_offset_checked() {
        let mut storage = [0u32; 2];
        let regs = window(&mut storage);
        regs.write(2, 1);
    }

    #[test]
    fn test_debug_output() {
        let mut storage = [0u32; 3];
        let regs = window(&mut storage);
        let text = format!("{regs:?}");
        assert!(text.contains("words: 3"));
        assert!(text.contains("mapped: false"));
    }
}
