//! # Emission payloads.
//!
//! Every event delivery carries an [`Emission`]: the event id, optional
//! data and metadata, the emitting definition, a wall-clock timestamp,
//! and a shared propagation flag.
//!
//! ## Ordering guarantees
//! Each emission has a globally unique sequence number (`seq`) that
//! increases monotonically. Use `seq` to restore the exact order when
//! emissions are recorded out of band.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::def::Id;
use crate::dynamic::{downcast, Dynamic};

/// Global sequence counter for emission ordering.
static EMISSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// One event delivery.
///
/// Clones share the propagation flag: a listener calling
/// [`stop_propagation`](Emission::stop_propagation) on its clone stops
/// delivery for the whole emission.
#[derive(Clone)]
pub struct Emission {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// The emitted event's id.
    pub event: Id,
    /// Id of the definition that emitted, if any.
    pub source: Option<Id>,
    /// The payload.
    pub data: Option<Dynamic>,
    /// Free-form metadata attached by the emitter.
    pub meta: Option<Dynamic>,

    stopped: Arc<AtomicBool>,
}

impl Emission {
    /// Creates an emission of the given event with the next sequence
    /// number and current timestamp.
    pub fn new(event: impl Into<Id>) -> Self {
        Self {
            seq: EMISSION_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            event: event.into(),
            source: None,
            data: None,
            meta: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attaches a payload.
    #[inline]
    pub fn with_data(mut self, data: Dynamic) -> Self {
        self.data = Some(data);
        self
    }

    /// Attaches the emitting definition's id.
    #[inline]
    pub fn with_source(mut self, source: Id) -> Self {
        self.source = Some(source);
        self
    }

    /// Attaches free-form metadata.
    #[inline]
    pub fn with_meta(mut self, meta: Dynamic) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Skips all remaining listeners of this emission.
    #[inline]
    pub fn stop_propagation(&self) {
        self.stopped.store(true, AtomicOrdering::SeqCst);
    }

    /// True once a listener stopped propagation.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }

    /// Downcasts the payload to a concrete type, sharing ownership.
    pub fn data_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.data.clone().and_then(downcast::<T>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::dynamic;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Emission::new("e");
        let b = Emission::new("e");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_clones_share_propagation_flag() {
        let em = Emission::new("e");
        let clone = em.clone();
        assert!(!em.is_stopped());
        clone.stop_propagation();
        assert!(em.is_stopped());
    }

    #[test]
    fn test_data_downcast() {
        let em = Emission::new("e").with_data(dynamic(7_u32));
        assert_eq!(*em.data_as::<u32>().unwrap(), 7);
        assert!(em.data_as::<String>().is_none());
    }
}
