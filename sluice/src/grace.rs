//! Grace-period sources for deferred reclamation.

use std::sync::Arc;

use crate::qsbr::Qsbr;

/// Something that hands out grace-period tokens and reports when they end.
///
/// Tokens must be monotonic: once `is_complete(t)` holds, it holds for every
/// earlier token too.
pub trait GracePeriod: Send + Sync {
    /// Opens a grace period for a resource that was just unlinked.
    fn start(&self) -> u64;

    /// Non-blocking: has every reader passed `token`?
    fn is_complete(&self, token: u64) -> bool;
}

impl GracePeriod for Qsbr {
    #[inline]
    fn start(&self) -> u64 {
        Qsbr::start(self)
    }

    #[inline]
    fn is_complete(&self, token: u64) -> bool {
        self.check(token, false)
    }
}

impl<G: GracePeriod + ?Sized> GracePeriod for Arc<G> {
    #[inline]
    fn start(&self) -> u64 {
        (**self).start()
    }

    #[inline]
    fn is_complete(&self, token: u64) -> bool {
        (**self).is_complete(token)
    }
}

impl<G: GracePeriod + ?Sized> GracePeriod for &G {
    #[inline]
    fn start(&self) -> u64 {
        (**self).start()
    }

    #[inline]
    fn is_complete(&self, token: u64) -> bool {
        (**self).is_complete(token)
    }
}
