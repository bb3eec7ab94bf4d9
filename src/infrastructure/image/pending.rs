//! Counter of outstanding background jobs that can be awaited to zero.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct PendingJobs {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingJobs {
    pub(crate) fn begin(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves once no job is outstanding.
    pub(crate) async fn wait_idle(&self) {
        loop {
            // registered before the check so a concurrent finish is not missed
            let idle = self.idle.notified();
            if self.len() == 0 {
                return;
            }
            idle.await;
        }
    }
}
