#![allow(unsafe_code)]
//! Readiness signals.
//!
//! The producer posts a signal after each complete frame write. Consumers only
//! ever try to acquire it without waiting, so a stalled producer can never
//! block a reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::IpcResult;

/// Consumer side of a readiness signal.
pub trait ReadinessSignal: Send {
    /// Non-blocking acquire. Returns `true` if a post was consumed.
    fn try_acquire(&mut self) -> bool;

    /// Consume every pending post and return how many there were.
    fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.try_acquire() {
            drained += 1;
        }
        drained
    }
}

/// Producer side of a readiness signal.
pub trait SignalPoster: Send {
    /// Announce that a complete frame is available.
    fn post(&mut self) -> IpcResult<()>;
}

/// Counting signal shared between threads of one process.
///
/// Clones share the same counter, so one clone can be handed to a publisher
/// and another to a reader.
#[derive(Debug, Clone, Default)]
pub struct InProcessSignal {
    pending: Arc<AtomicU64>,
}

impl InProcessSignal {
    /// New signal with no pending posts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending posts.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }
}

impl ReadinessSignal for InProcessSignal {
    fn try_acquire(&mut self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl SignalPoster for InProcessSignal {
    fn post(&mut self) -> IpcResult<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(unix)]
pub use posix::PosixSemaphore;

#[cfg(unix)]
mod posix {
    use std::ffi::CString;
    use std::path::PathBuf;

    use super::{ReadinessSignal, SignalPoster};
    use crate::error::{IpcError, IpcResult};

    /// POSIX named semaphore (`sem_open` / `sem_trywait`).
    #[derive(Debug)]
    pub struct PosixSemaphore {
        sem: *mut libc::sem_t,
        name: CString,
        owner: bool,
    }

    // SAFETY: A POSIX semaphore handle may be used from any thread; sem_trywait
    // and sem_post are async-signal-safe and thread-safe. We never share the
    // handle between threads without `&mut`.
    unsafe impl Send for PosixSemaphore {}

    fn c_name(name: &str) -> IpcResult<CString> {
        CString::new(name).map_err(|_| {
            IpcError::unavailable("semaphore", PathBuf::from(name), "name contains NUL")
        })
    }

    impl PosixSemaphore {
        /// Open an existing semaphore created by the producer. Never creates it.
        pub fn open(name: &str) -> IpcResult<Self> {
            let c = c_name(name)?;
            // SAFETY: `c` is a valid NUL-terminated string for the duration of
            // the call; without O_CREAT no mode/value arguments are read.
            let sem = unsafe { libc::sem_open(c.as_ptr(), 0) };
            if sem == libc::SEM_FAILED {
                return Err(IpcError::unavailable(
                    "semaphore",
                    PathBuf::from(name),
                    std::io::Error::last_os_error(),
                ));
            }
            Ok(Self {
                sem,
                name: c,
                owner: false,
            })
        }

        /// Create the semaphore with a zero count, as the producer does. The
        /// creating handle unlinks the name when dropped.
        pub fn create(name: &str) -> IpcResult<Self> {
            let c = c_name(name)?;
            // SAFETY: O_CREAT takes a mode and an initial value as variadic
            // arguments, both passed as c_uint.
            let sem = unsafe {
                libc::sem_open(
                    c.as_ptr(),
                    libc::O_CREAT,
                    0o666 as libc::c_uint,
                    0 as libc::c_uint,
                )
            };
            if sem == libc::SEM_FAILED {
                return Err(IpcError::Io(std::io::Error::last_os_error()));
            }
            Ok(Self {
                sem,
                name: c,
                owner: true,
            })
        }

        /// Semaphore name.
        pub fn name(&self) -> &str {
            self.name.to_str().unwrap_or_default()
        }
    }

    impl ReadinessSignal for PosixSemaphore {
        fn try_acquire(&mut self) -> bool {
            // SAFETY: `sem` was returned by a successful sem_open and stays open
            // until drop.
            unsafe { libc::sem_trywait(self.sem) == 0 }
        }
    }

    impl SignalPoster for PosixSemaphore {
        fn post(&mut self) -> IpcResult<()> {
            // SAFETY: see try_acquire.
            if unsafe { libc::sem_post(self.sem) } != 0 {
                return Err(IpcError::Io(std::io::Error::last_os_error()));
            }
            Ok(())
        }
    }

    impl Drop for PosixSemaphore {
        fn drop(&mut self) {
            // SAFETY: `sem` is open and is not used after this point.
            unsafe {
                libc::sem_close(self.sem);
                if self.owner {
                    libc::sem_unlink(self.name.as_ptr());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_process_signal_counts_posts() {
        let mut publisher = InProcessSignal::new();
        let mut reader = publisher.clone();

        assert!(!reader.try_acquire());
        publisher.post().unwrap();
        publisher.post().unwrap();
        publisher.post().unwrap();

        assert!(reader.try_acquire());
        assert_eq!(reader.drain(), 2);
        assert!(!reader.try_acquire());
        assert_eq!(publisher.pending(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_opening_missing_semaphore_fails() {
        let name = format!("/omnisight_test_missing_{}", std::process::id());
        assert!(PosixSemaphore::open(&name).is_err());
    }
}
