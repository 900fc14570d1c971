//! Memory protection for key material
//!
//! Three pieces:
//!
//! 1. **`SecretBytes`**: the only container used for sensitive leaves (mnemonic
//!    phrase, seed, private keys, passphrases). Fixed length, `mlock`ed where the
//!    platform allows, overwritten by [`SecretBytes::purge`] and zeroized on drop.
//!
//! 2. **Core dump prevention**: `setrlimit(RLIMIT_CORE, 0)` so a crash never writes
//!    key material to disk.
//!
//! 3. **Memory locking**: `mlock()` keeps pages holding secrets out of swap.
//!
//! Locking and core dump prevention are best-effort: containers and unprivileged
//! users often cannot use them, so failures are logged and ignored.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

/// Disable core dumps for the current process.
///
/// Call early in startup, before any bundle is decrypted. Returns `true` if core
/// dumps are (or already were) disabled.
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    #[cfg(unix)]
    {
        unix::disable_core_dumps_impl()
    }

    #[cfg(not(unix))]
    {
        log::warn!("core dump prevention not supported on this platform");
        false
    }
}

/// Lock a memory region so it is never swapped to disk.
///
/// # Safety
///
/// `ptr` must point to a valid allocation of at least `len` bytes, and the region
/// must be unlocked (or the process must exit) before the allocation is freed.
pub unsafe fn mlock(ptr: *const u8, len: usize) -> bool {
    if len == 0 {
        return true;
    }

    #[cfg(unix)]
    {
        unix::mlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        false
    }
}

/// Unlock a region previously passed to [`mlock`].
///
/// # Safety
///
/// `ptr` and `len` must match a previous `mlock` call.
pub unsafe fn munlock(ptr: *const u8, len: usize) -> bool {
    if len == 0 {
        return true;
    }

    #[cfg(unix)]
    {
        unix::munlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        true
    }
}

/// Fixed-length buffer for sensitive bytes.
///
/// The allocation never grows, so no stale copies are left behind by reallocation.
/// There is deliberately no `Clone`; use [`SecretBytes::duplicate`] where a second
/// owned copy is part of the contract.
pub struct SecretBytes {
    data: Vec<u8>,
    locked: bool,
}

impl SecretBytes {
    /// Create a zero-filled buffer of `len` bytes and lock it in memory.
    pub fn zeroed(len: usize) -> Self {
        let data = vec![0u8; len];
        let locked = if data.is_empty() {
            true
        } else {
            // SAFETY: `data` is a live allocation of exactly `len` bytes, unlocked in Drop.
            unsafe { mlock(data.as_ptr(), data.len()) }
        };

        if !locked {
            log::debug!("mlock unavailable for {} byte secret buffer", len);
        }

        Self { data, locked }
    }

    /// Copy `bytes` into a new locked buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut secret = Self::zeroed(bytes.len());
        secret.data.copy_from_slice(bytes);
        secret
    }

    /// Move the contents of `bytes` into a locked buffer, zeroizing the source.
    pub fn from_vec(mut bytes: Vec<u8>) -> Self {
        let secret = Self::from_slice(&bytes);
        bytes.zeroize();
        secret
    }

    /// Second owned copy of the same bytes.
    pub fn duplicate(&self) -> Self {
        Self::from_slice(&self.data)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the pages backing this buffer are actually locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// The contents as UTF-8, or `""` if they are not valid UTF-8.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.data).unwrap_or_default()
    }

    /// Overwrite every byte with fresh CSPRNG output.
    ///
    /// Falls back to zeroing if the RNG cannot be read; the old contents are
    /// destroyed either way.
    pub fn purge(&mut self) {
        if OsRng.try_fill_bytes(&mut self.data).is_err() {
            log::warn!("CSPRNG unavailable during purge, zeroizing instead");
            self.data.as_mut_slice().zeroize();
        }
    }

    /// Like [`purge`](Self::purge), but keeps the buffer printable by mapping the
    /// random bytes onto lowercase hex characters. Used for text secrets.
    pub fn purge_text(&mut self) {
        self.purge();
        for b in self.data.iter_mut() {
            *b = HEX_CHARS[(*b & 0x0f) as usize];
        }
    }
}

impl PartialEq for SecretBytes {
    fn eq(&self, other: &Self) -> bool {
        if self.data.len() != other.data.len() {
            return false;
        }
        self.data
            .iter()
            .zip(other.data.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for SecretBytes {}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.data.len())
    }
}

impl Zeroize for SecretBytes {
    fn zeroize(&mut self) {
        self.data.as_mut_slice().zeroize();
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        // Zeroize before unlocking. Vec::zeroize also clears the length, so keep
        // the capacity for munlock.
        let len = self.data.capacity();
        let ptr = self.data.as_ptr();
        self.data.zeroize();

        if self.locked && len != 0 {
            // SAFETY: same allocation and length that were passed to mlock.
            unsafe {
                munlock(ptr, len);
            }
        }
    }
}

// ---- Platform implementations ----

#[cfg(unix)]
mod unix {
    pub fn disable_core_dumps_impl() -> bool {
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a standard POSIX operation
        unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            if libc::setrlimit(libc::RLIMIT_CORE, &rlim) != 0 {
                log::warn!(
                    "failed to disable core dumps: {}",
                    std::io::Error::last_os_error()
                );
                return false;
            }
        }
        true
    }

    pub unsafe fn mlock_impl(ptr: *const u8, len: usize) -> bool {
        libc::mlock(ptr as *const libc::c_void, len) == 0
    }

    pub unsafe fn munlock_impl(ptr: *const u8, len: usize) -> bool {
        libc::munlock(ptr as *const libc::c_void, len) == 0
    }
}
