//! Secure Memory
//!
//! Pins heap buffers that hold key material so the OS will not page them out
//! to swap. Complements `zeroize`: locking keeps secrets off disk while they
//! are alive, zeroizing clears them when they are dropped.
//!
//! - **Unix**: `mlock()` / `munlock()`
//! - **Windows**: `VirtualLock()` / `VirtualUnlock()`
//! - **Other**: warns once per lock attempt and continues unlocked
//!
//! Failure to lock (for example when `RLIMIT_MEMLOCK` is exhausted) is never
//! fatal.

use std::mem;
use std::ptr::NonNull;

/// Outcome of a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Locked,
    Failed,
    Unsupported,
}

/// RAII guard over a locked memory region; unlocks on drop.
///
/// The guard must be dropped before the memory it covers is freed. Owners
/// declare the guard field before the protected field so that struct drop
/// order handles this.
#[derive(Debug)]
pub struct LockedRegion {
    ptr: NonNull<u8>,
    len: usize,
    status: LockStatus,
}

// SAFETY: the pointer is only handed to the OS lock/unlock calls, never
// dereferenced.
unsafe impl Send for LockedRegion {}
unsafe impl Sync for LockedRegion {}

impl LockedRegion {
    /// Lock the memory occupied by `value`.
    ///
    /// # Safety
    /// `value` must stay at the same address and outlive the returned guard,
    /// which in practice means it lives in a `Box` owned next to the guard.
    pub unsafe fn covering<T>(value: &T) -> Self {
        let len = mem::size_of::<T>();
        let ptr = NonNull::from(value).cast::<u8>();
        Self::lock(ptr, len)
    }

    unsafe fn lock(ptr: NonNull<u8>, len: usize) -> Self {
        let status = if len == 0 {
            LockStatus::Locked
        } else {
            platform::lock(ptr, len)
        };
        Self { ptr, len, status }
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }

    pub fn is_locked(&self) -> bool {
        self.status == LockStatus::Locked
    }
}

impl Drop for LockedRegion {
    fn drop(&mut self) {
        if self.status == LockStatus::Locked && self.len > 0 {
            // SAFETY: only regions we locked are unlocked, and owners drop
            // the guard before the memory.
            unsafe { platform::unlock(self.ptr, self.len) }
        }
    }
}

#[cfg(unix)]
mod platform {
    use super::LockStatus;
    use std::ptr::NonNull;

    pub unsafe fn lock(ptr: NonNull<u8>, len: usize) -> LockStatus {
        if libc::mlock(ptr.as_ptr() as *const libc::c_void, len) == 0 {
            tracing::debug!("Locked {} bytes of key material", len);
            return LockStatus::Locked;
        }

        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(0);
        let reason = match errno {
            libc::ENOMEM => "exceeds RLIMIT_MEMLOCK",
            libc::EPERM => "not permitted (CAP_IPC_LOCK missing)",
            libc::EINVAL => "invalid address range",
            _ => "unknown error",
        };
        tracing::warn!(
            "Could not lock key material in memory: {} (errno {}); it may be swapped to disk",
            reason,
            errno
        );
        LockStatus::Failed
    }

    pub unsafe fn unlock(ptr: NonNull<u8>, len: usize) {
        if libc::munlock(ptr.as_ptr() as *const libc::c_void, len) != 0 {
            tracing::debug!("munlock failed for {} bytes", len);
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::LockStatus;
    use std::ptr::NonNull;
    use windows::Win32::System::Memory::{VirtualLock, VirtualUnlock};

    pub unsafe fn lock(ptr: NonNull<u8>, len: usize) -> LockStatus {
        match VirtualLock(ptr.as_ptr() as *const std::ffi::c_void, len) {
            Ok(()) => {
                tracing::debug!("Locked {} bytes of key material", len);
                LockStatus::Locked
            }
            Err(e) => {
                tracing::warn!(
                    "Could not lock key material in memory: {}; it may be swapped to disk",
                    e
                );
                LockStatus::Failed
            }
        }
    }

    pub unsafe fn unlock(ptr: NonNull<u8>, len: usize) {
        if VirtualUnlock(ptr.as_ptr() as *const std::ffi::c_void, len).is_err() {
            tracing::debug!("VirtualUnlock failed for {} bytes", len);
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use super::LockStatus;
    use std::ptr::NonNull;

    pub unsafe fn lock(_ptr: NonNull<u8>, _len: usize) -> LockStatus {
        tracing::warn!("Memory locking unsupported on this platform");
        LockStatus::Unsupported
    }

    pub unsafe fn unlock(_ptr: NonNull<u8>, _len: usize) {}
}
