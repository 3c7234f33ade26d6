//! Bounded exponential back-off for transient link errors

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::Error;

/// How often and how patiently to retry a board call that failed with a
/// transient communication error. Any other error is returned at once.
///
/// Delays start at `initial_delay` and are multiplied by `factor` after
/// every retry, so the defaults sleep 1 ms, 10 ms and 100 ms before giving up.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 3,
            initial_delay: Duration::from_millis(1),
            factor: 10,
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        RetryPolicy { retries: 0, ..Default::default() }
    }

    /// The sleeps taken before each retry, in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut delay = self.initial_delay;
        (0..self.retries).map(move |_| {
            let d = delay;
            delay = delay.saturating_mul(self.factor);
            d
        })
    }

    pub fn back_off_repeat<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
    {
        self.back_off_repeat_with(f, thread::sleep)
    }

    /// As [`back_off_repeat`](Self::back_off_repeat), sleeping with `sleep`
    pub fn back_off_repeat_with<T, F, S>(&self, mut f: F, mut sleep: S) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
        S: FnMut(Duration),
    {
        let mut delays = self.delays();
        loop {
            match f() {
                Err(e) if e.is_transient() => match delays.next() {
                    Some(d) => {
                        debug!("{}, retrying in {:?}", e, d);
                        sleep(d);
                    }
                    None => {
                        return Err(Error::Exhausted { retries: self.retries, source: Box::new(e) })
                    }
                },
                r => return r,
            }
        }
    }
}
