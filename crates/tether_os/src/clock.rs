#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tether_kernel_contracts::UnixTimeSecs;

pub trait Clock {
    fn now(&self) -> UnixTimeSecs;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> UnixTimeSecs {
        (**self).now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> UnixTimeSecs {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimeSecs {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        UnixTimeSecs(secs)
    }
}

/// Clock that only moves when told to. Used for replaying schedules deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_secs: AtomicU64,
}

impl ManualClock {
    pub fn new(start: UnixTimeSecs) -> Self {
        Self {
            now_secs: AtomicU64::new(start.0),
        }
    }

    pub fn set(&self, now: UnixTimeSecs) {
        self.now_secs.store(now.0, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        let _ = self
            .now_secs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_add(secs))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimeSecs {
        UnixTimeSecs(self.now_secs.load(Ordering::SeqCst))
    }
}
