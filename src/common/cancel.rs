//! Cooperative stop signal
//!
//! The orchestrator only polls; whoever owns the signal decides when it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Observable abort condition
pub trait StopSignal: Send + Sync {
    fn is_signalled(&self) -> bool;
}

impl StopSignal for CancellationToken {
    fn is_signalled(&self) -> bool {
        self.is_cancelled()
    }
}

impl StopSignal for AtomicBool {
    fn is_signalled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl<T: StopSignal + ?Sized> StopSignal for &T {
    fn is_signalled(&self) -> bool {
        (**self).is_signalled()
    }
}

impl<T: StopSignal + ?Sized> StopSignal for Arc<T> {
    fn is_signalled(&self) -> bool {
        (**self).is_signalled()
    }
}

/// A signal that never fires
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverStop;

impl StopSignal for NeverStop {
    fn is_signalled(&self) -> bool {
        false
    }
}
