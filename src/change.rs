//! Change detection over serialized state.
//!
//! States carry no dirty flags; instead every save pass re-serializes the
//! state into a rolling mixer and compares the resulting digest against the
//! digest as of the last successful persist. The mixing constants are fixed:
//! digests must be stable across processes.

use std::io::{self, Write};

use parking_lot::Mutex;
use tracing::warn;

use crate::component::ActorState;

/// Seed for the rolling mixer. Odd, fixed forever.
const DIGEST_SEED: u64 = 0x9E37_79B9_7F4A_7C15;
/// Per-byte multiplier. Large, odd, fixed forever.
const DIGEST_MULTIPLIER: u64 = 0xC2B2_AE3D_27D4_EB4F;

/// 128-bit state digest: mixer accumulator plus total byte length.
///
/// `Digest::ZERO` doubles as the "digest lost" sentinel: a serialization
/// failure produces it, and a detector holding it always reports changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Digest {
    pub hash: u64,
    pub len: u64,
}

impl Digest {
    pub const ZERO: Digest = Digest { hash: 0, len: 0 };

    pub fn is_zero(self) -> bool {
        self == Digest::ZERO
    }
}

/// Streaming hasher: an `io::Write` sink that folds bytes into the mixer.
#[derive(Debug)]
pub struct DigestSink {
    hash: u64,
    len: u64,
}

impl DigestSink {
    pub fn new() -> Self {
        DigestSink {
            hash: DIGEST_SEED,
            len: 0,
        }
    }

    pub fn digest(&self) -> Digest {
        Digest {
            hash: self.hash,
            len: self.len,
        }
    }
}

impl Default for DigestSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for DigestSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            self.hash = self.hash.wrapping_add(b as u64).wrapping_mul(DIGEST_MULTIPLIER);
        }
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn digest_of(bytes: &[u8]) -> Digest {
    let mut sink = DigestSink::new();
    // DigestSink::write is infallible.
    let _ = sink.write_all(bytes);
    sink.digest()
}

/// Outcome of a change check: whether a persist is due, plus the serialized
/// bytes to persist (absent when serialization itself failed).
#[derive(Debug)]
pub struct ChangeCheck {
    pub changed: bool,
    pub bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
struct Digests {
    current: Digest,
    persisted: Digest,
}

/// Tracks the digest of a state's serialized form as of the last successful
/// persist. Attached lazily to each component's state after load.
#[derive(Debug)]
pub struct ChangeDetector {
    digests: Mutex<Digests>,
}

impl ChangeDetector {
    /// First observation after load from the store: the freshly loaded state
    /// is by definition unchanged.
    pub fn attach(state: &dyn ActorState) -> Self {
        let digest = match serialize(state) {
            Some(bytes) => digest_of(&bytes),
            None => Digest::ZERO,
        };
        ChangeDetector {
            digests: Mutex::new(Digests {
                current: digest,
                persisted: digest,
            }),
        }
    }

    /// Re-serializes and reports whether the state differs from the last
    /// persisted digest. Also hands back the serialized bytes so the save
    /// path serializes exactly once.
    pub fn check(&self, state: &dyn ActorState) -> ChangeCheck {
        let bytes = serialize(state);
        let mut digests = self.digests.lock();
        if digests.current != digests.persisted {
            // A previous check already proved divergence; the persist never
            // landed, so a save is still due.
            return ChangeCheck {
                changed: true,
                bytes,
            };
        }
        digests.current = match &bytes {
            Some(b) => digest_of(b),
            None => Digest::ZERO,
        };
        let changed = digests.current != digests.persisted || digests.current.is_zero();
        ChangeCheck { changed, bytes }
    }

    pub fn is_changed(&self, state: &dyn ActorState) -> bool {
        self.check(state).changed
    }

    /// Called after a successful upsert.
    pub fn mark_persisted(&self) {
        let mut digests = self.digests.lock();
        digests.persisted = digests.current;
    }

    #[cfg(test)]
    fn current(&self) -> Digest {
        self.digests.lock().current
    }
}

fn serialize(state: &dyn ActorState) -> Option<Vec<u8>> {
    let mut buf = Vec::with_capacity(256);
    match state.write_bytes(&mut buf) {
        Ok(()) => Some(buf),
        Err(e) => {
            warn!(state_id = state.state_id(), error = %e, "state serialization failed, forcing digest loss");
            None
        }
    }
}
