//! Locked memory for the DMA engine and its virtual to physical page table.
//!
//! The DMA engine only understands bus addresses, so the control block and the
//! sample buffer live in an anonymous, locked mapping whose pages are resolved
//! through `/proc/self/pagemap` once at start-up. Each page gets one
//! [`PageEntry`]; translations in both directions are done against that table.
//!
//! # Page map entry format
//! - Bit 63: page present
//! - Bits 54-0: page frame number (reads as zero without `CAP_SYS_ADMIN`)

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ptr::{self, NonNull};

use log::{debug, warn};

use crate::Error;

/// Size of a page as used by the page map.
pub const PAGE_SIZE: usize = 4096;
/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

const PAGEMAP: &str = "/proc/self/pagemap";
const PAGEMAP_ENTRY_BYTES: u64 = 8;
const PAGEMAP_PRESENT: u64 = 1 << 63;
const PAGEMAP_PFN_MASK: u64 = (1 << 55) - 1;

/// One locked page and the bus address the DMA engine sees it at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    /// Virtual address of the start of the page
    pub virt: usize,
    /// Bus address of the start of the page
    pub phys: u32,
}

/// Anonymous, locked, page aligned mapping.
struct LockedRegion {
    addr: NonNull<u8>,
    len: usize,
}

impl LockedRegion {
    fn new(pages: usize) -> Result<Self, Error> {
        let len = pages * PAGE_SIZE;
        // SAFETY: anonymous mapping with no file or address hint.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_LOCKED,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::Allocate {
                pages,
                source: io::Error::last_os_error(),
            });
        }
        let region = Self {
            addr: NonNull::new(addr.cast::<u8>()).ok_or_else(|| Error::Allocate {
                pages,
                source: io::Error::from(io::ErrorKind::AddrNotAvailable),
            })?,
            len,
        };
        if region.addr.as_ptr() as usize & (PAGE_SIZE - 1) != 0 {
            return Err(Error::Misaligned(region.addr.as_ptr() as usize));
        }
        Ok(region)
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        // SAFETY: addr/len came from mmap in `new`; munmap also unlocks.
        unsafe {
            libc::munmap(self.addr.as_ptr().cast(), self.len);
        }
    }
}

/// Page table of the locked DMA region.
///
/// Built once, immutable afterwards, and released (unlocked and unmapped) when
/// dropped.
pub struct PageTable {
    base: NonNull<u8>,
    entries: Vec<PageEntry>,
    region: Option<LockedRegion>,
}

impl PageTable {
    /// Allocates `page_count` locked pages and resolves their bus addresses.
    ///
    /// Every page is touched before it is looked up so the kernel has backed
    /// it; `bus_alias` is OR-ed into each frame address to select the DMA
    /// engine's view of SDRAM.
    ///
    /// # Errors
    ///
    /// [`Error::Allocate`], [`Error::Misaligned`], [`Error::Open`],
    /// [`Error::PageMap`] or [`Error::PageNotPresent`]; all fatal.
    pub fn allocate(page_count: usize, bus_alias: u32) -> Result<Self, Error> {
        let region = LockedRegion::new(page_count)?;
        let base = region.addr;

        let mut pagemap = File::open(PAGEMAP).map_err(|source| Error::Open {
            path: PAGEMAP,
            source,
        })?;
        let first_page = (base.as_ptr() as usize >> PAGE_SHIFT) as u64;
        pagemap
            .seek(SeekFrom::Start(first_page * PAGEMAP_ENTRY_BYTES))
            .map_err(Error::PageMap)?;

        let mut entries = Vec::with_capacity(page_count);
        for page in 0..page_count {
            // SAFETY: page < page_count, so the byte is inside the region.
            let virt = unsafe { base.as_ptr().add(page * PAGE_SIZE) };
            // SAFETY: the region is mapped read/write; the write forces residency.
            unsafe { virt.write_volatile(0) };

            let mut raw = [0u8; PAGEMAP_ENTRY_BYTES as usize];
            pagemap.read_exact(&mut raw).map_err(Error::PageMap)?;
            let entry = u64::from_ne_bytes(raw);
            if entry & PAGEMAP_PRESENT == 0 {
                return Err(Error::PageNotPresent { page, entry });
            }

            let pfn = entry & PAGEMAP_PFN_MASK;
            if pfn == 0 {
                warn!("page {page} reports frame 0; DMA needs the page map read as root");
            }
            let phys = ((pfn << PAGE_SHIFT) as u32) | bus_alias;
            debug!("page {page}: {virt:p} -> {phys:#010x}");
            entries.push(PageEntry {
                virt: virt as usize,
                phys,
            });
        }

        Ok(Self {
            base,
            entries,
            region: Some(region),
        })
    }

    /// Builds a table over memory the caller owns, one entry per bus frame
    /// address in `frames`.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `frames.len()` pages for
    /// as long as the table is used.
    #[must_use]
    pub unsafe fn from_frames(base: NonNull<u8>, frames: &[u32]) -> Self {
        let entries = frames
            .iter()
            .enumerate()
            .map(|(page, &phys)| PageEntry {
                virt: base.as_ptr() as usize + page * PAGE_SIZE,
                phys,
            })
            .collect();
        Self {
            base,
            entries,
            region: None,
        }
    }

    /// Start of the locked region.
    #[must_use]
    pub const fn as_mut_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// All pages, in address order.
    #[must_use]
    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    /// Size of the region in bytes.
    #[must_use]
    pub fn len_bytes(&self) -> usize {
        self.entries.len() * PAGE_SIZE
    }

    /// Bus address of a pointer into the region.
    ///
    /// # Errors
    ///
    /// [`Error::AddressOutOfRange`] if `ptr` is not inside the region.
    pub fn virt_to_phys<T>(&self, ptr: *const T) -> Result<u32, Error> {
        let addr = ptr as usize;
        let offset = addr
            .checked_sub(self.base.as_ptr() as usize)
            .ok_or(Error::AddressOutOfRange(addr))?;
        let entry = self
            .entries
            .get(offset >> PAGE_SHIFT)
            .ok_or(Error::AddressOutOfRange(addr))?;
        Ok(entry.phys + (offset % PAGE_SIZE) as u32)
    }

    /// Pointer inside the region for a bus address.
    ///
    /// # Errors
    ///
    /// [`Error::ReverseMap`] if no page of the region has that frame.
    pub fn phys_to_virt(&self, phys: u32) -> Result<NonNull<u8>, Error> {
        let page_offset = phys & (PAGE_SIZE as u32 - 1);
        let page_addr = phys - page_offset;
        let page = self
            .entries
            .iter()
            .position(|entry| entry.phys == page_addr)
            .ok_or(Error::ReverseMap(phys))?;
        let ptr = self
            .base
            .as_ptr()
            .wrapping_add(page * PAGE_SIZE + page_offset as usize);
        NonNull::new(ptr).ok_or(Error::ReverseMap(phys))
    }
}

impl core::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTable")
            .field("base", &self.base)
            .field("pages", &self.entries.len())
            .field("locked", &self.region.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAMES: [u32; 3] = [0x4012_3000, 0x4000_8000, 0x4055_5000];

    // Translations only do address arithmetic, so the base never needs to be
    // dereferenced in these tests.
    fn table() -> PageTable {
        let base = NonNull::new(0x7000_0000usize as *mut u8).unwrap();
        unsafe { PageTable::from_frames(base, &FRAMES) }
    }

    #[test]
    fn test_from_frames_entries() {
        let table = table();
        assert_eq!(table.entries().len(), 3);
        assert_eq!(table.len_bytes(), 3 * PAGE_SIZE);
        assert_eq!(table.entries()[1].virt, 0x7000_1000);
        assert_eq!(table.entries()[1].phys, 0x4000_8000);
    }

    #[test]
    fn test_virt_to_phys() {
        let table = table();
        let base = table.as_mut_ptr();
        assert_eq!(table.virt_to_phys(base.cast_const()).unwrap(), 0x4012_3000);
        let ptr = base.wrapping_add(PAGE_SIZE + 0x20);
        assert_eq!(table.virt_to_phys(ptr.cast_const()).unwrap(), 0x4000_8020);
        let ptr = base.wrapping_add(3 * PAGE_SIZE - 1);
        assert_eq!(table.virt_to_phys(ptr.cast_const()).unwrap(), 0x4055_5FFF);
    }

    #[test]
    fn test_virt_to_phys_out_of_range() {
        let table = table();
        let before = table.as_mut_ptr().wrapping_sub(1);
        assert!(matches!(
            table.virt_to_phys(before.cast_const()),
            Err(Error::AddressOutOfRange(_))
        ));
        let after = table.as_mut_ptr().wrapping_add(3 * PAGE_SIZE);
        assert!(matches!(
            table.virt_to_phys(after.cast_const()),
            Err(Error::AddressOutOfRange(_))
        ));
    }

    #[test]
    fn test_phys_to_virt() {
        let table = table();
        let ptr = table.phys_to_virt(0x4055_5010).unwrap();
        assert_eq!(ptr.as_ptr() as usize, 0x7000_2010);
    }

    #[test]
    fn test_phys_to_virt_unknown_frame() {
        let table = table();
        assert!(matches!(
            table.phys_to_virt(0x4099_9000),
            Err(Error::ReverseMap(0x4099_9000))
        ));
    }

    #[test]
    fn test_address_round_trip() {
        let table = table();
        for entry in table.entries() {
            for offset in [0u32, 4, 0x800, 0xFFC] {
                let phys = entry.phys + offset;
                let virt = table.phys_to_virt(phys).unwrap();
                assert_eq!(table.virt_to_phys(virt.as_ptr().cast_const()).unwrap(), phys);
            }
        }
    }

    #[test]
    fn test_debug_output() {
        let text = format!("{:?}", table());
        assert!(text.contains("pages: 3"));
        assert!(text.contains("locked: false"));
    }

    #[test]
    fn test_allocate_locked_pages() {
        let table = PageTable::allocate(2, 0x4000_0000).unwrap();
        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.len_bytes(), 2 * PAGE_SIZE);
        assert_eq!(table.as_mut_ptr() as usize % PAGE_SIZE, 0);

        let [first, second] = table.entries() else {
            panic!("expected two entries");
        };
        assert_eq!(first.virt, table.as_mut_ptr() as usize);
        assert_eq!(second.virt, first.virt + PAGE_SIZE);
        for entry in table.entries() {
            assert_ne!(entry.phys & 0x4000_0000, 0);
            assert_eq!(entry.phys as usize % PAGE_SIZE, 0);
        }

        let ptr = table.as_mut_ptr().wrapping_add(PAGE_SIZE + 0x40);
        let phys = table.virt_to_phys(ptr.cast_const()).unwrap();
        assert_eq!(phys, second.phys + 0x40);
        // without root every frame reads as 0, so only distinct frames map back
        if first.phys != second.phys {
            assert_eq!(table.phys_to_virt(phys).unwrap().as_ptr(), ptr);
        }

        // the pages are ours to write
        unsafe { ptr.write_volatile(0xA5) };
        assert_eq!(unsafe { ptr.read_volatile() }, 0xA5);
        assert!(format!("{table:?}").contains("locked: true"));
    }
}
