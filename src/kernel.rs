use std::{ptr::NonNull, sync::OnceLock};

/// Virtual memory page size of the computer. This is usually 4096, but we
/// don't know the value at compile time so we ask the kernel the first time
/// somebody needs it.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// The platform side of the allocator. This is where we talk to the kernel to
/// get memory for [`crate::arena::MmapArena`].
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The allocator itself only sees an [`crate::arena::Arena`],
/// so it has nothing to do with the concrete APIs offered by each kernel.
trait PlatformMemory {
    /// Request a read-write memory region of size `len`. It returns a pointer to the
    /// region or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(Kernel::page_size)
}

/// Wrapper to use [`Kernel::request_memory`]. The region is zeroed.
///
/// **SAFETY**: `len` must be a non-zero multiple of [`page_size`].
#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
    unsafe { Kernel::request_memory(len) }
}

/// Wrapper to use [`Kernel::return_memory`].
///
/// **SAFETY**: `addr` and `len` must describe exactly one region obtained from
/// [`request_memory`], and nothing may touch it afterwards.
#[inline]
pub(crate) unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
    unsafe { Kernel::return_memory(addr, len) }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{os::raw::{c_int, c_void}, ptr::NonNull};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
            }
        }

        fn page_size() -> usize {
            // SAFETY: sysconf has no preconditions.
            match unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } {
                size if size > 0 => size as usize,
                _ => 4096,
            }
        }
    }
}

#[cfg(windows)]
mod win32 {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let size = page_size();

        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn requested_memory_is_writable() {
        let len = page_size();

        unsafe {
            let addr = request_memory(len).expect("kernel refused one page");
            let bytes = std::slice::from_raw_parts_mut(addr.as_ptr(), len);

            assert!(bytes.iter().all(|&b| b == 0));
            bytes[0] = 0xAB;
            bytes[len - 1] = 0xCD;
            assert_eq!((bytes[0], bytes[len - 1]), (0xAB, 0xCD));

            return_memory(addr, len);
        }
    }
}
