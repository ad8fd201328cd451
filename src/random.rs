//! Sources of the random client challenge and secondary key.
//!
//! Every handshake draws fresh bytes, possibly from many requests at once, so a source must be
//! usable from several threads. Failing to obtain randomness is fatal for NTLM and is reported as
//! [`NtlmError::RandomUnavailable`].


use std::fmt;
use std::sync::Mutex;

use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::NtlmError;


/// A thread-safe provider of cryptographically secure random bytes.
pub trait RandomSource: fmt::Debug + Send + Sync {
    /// Fills `dest` entirely with random bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<(), NtlmError>;
}


/// Draws random bytes from the operating system.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct OsRandom;
impl RandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<(), NtlmError> {
        let mut rng = OsRng;
        rng.try_fill_bytes(dest)
            .map_err(|e| NtlmError::RandomUnavailable { reason: e.to_string() })
    }
}


/// Shares an arbitrary random number generator between threads by locking it for every request.
///
/// Mostly useful to plug in a seeded generator for reproducible handshakes.
pub struct SharedRng<R> {
    rng: Mutex<R>,
}
impl<R: RngCore> SharedRng<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }
}
impl<R> fmt::Debug for SharedRng<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRng")
            .finish_non_exhaustive()
    }
}
impl<R: RngCore + Send> RandomSource for SharedRng<R> {
    fn fill(&self, dest: &mut [u8]) -> Result<(), NtlmError> {
        let mut rng = self.rng.lock()
            .map_err(|_| NtlmError::RandomUnavailable { reason: "random generator lock poisoned".to_owned() })?;
        rng.try_fill_bytes(dest)
            .map_err(|e| NtlmError::RandomUnavailable { reason: e.to_string() })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use super::*;

    #[test]
    fn os_random_fills_buffer() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        OsRandom.fill(&mut a).unwrap();
        OsRandom.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn seeded_source_is_reproducible() {
        let first = SharedRng::new(StdRng::seed_from_u64(42));
        let second = SharedRng::new(StdRng::seed_from_u64(42));
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        first.fill(&mut a).unwrap();
        second.fill(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn shared_between_threads() {
        let source: Arc<dyn RandomSource> = Arc::new(SharedRng::new(StdRng::seed_from_u64(7)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    let mut buf = [0u8; 8];
                    source.fill(&mut buf).unwrap();
                    buf
                })
            })
            .collect();
        let mut outputs: Vec<[u8; 8]> = handles.into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        outputs.sort();
        outputs.dedup();
        assert_eq!(outputs.len(), 4);
    }
}
