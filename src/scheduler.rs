//! Debounced tasks on the runtime's logical clock.

/// A single debounced task: at most one pending firing at a time.
///
/// The owner decides what the task does; this type only tracks when it
/// is due.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Debounced {
    due: Option<u64>,
}

impl Debounced {
    /// Refreshes the task.
    ///
    /// The timeout used is `force_timeout` when given, else
    /// `default_timeout`. A `None` timeout cancels any pending firing and
    /// returns `true`: the caller must run the task right away. Otherwise
    /// an already pending firing is kept unless a timeout was forced, in
    /// which case it is replaced.
    pub fn refresh(&mut self, now: u64, default_timeout: Option<u32>, force_timeout: Option<Option<u32>>) -> bool {
        match force_timeout.unwrap_or(default_timeout) {
            None => {
                self.due = None;
                true
            }
            Some(ms) => {
                if force_timeout.is_some() {
                    self.cancel();
                }
                self.schedule(now, ms);
                false
            }
        }
    }

    /// Schedules a firing `delay` ms from `now` unless one is pending.
    pub fn schedule(&mut self, now: u64, delay: u32) {
        self.due.get_or_insert(now + u64::from(delay));
    }

    /// Drops the pending firing. Returns whether there was one.
    pub fn cancel(&mut self) -> bool {
        self.due.take().is_some()
    }

    /// Like [`cancel`](Self::cancel); the caller runs the task when this
    /// returns `true`.
    pub fn flush(&mut self) -> bool {
        self.cancel()
    }

    /// Consumes the firing if it is due at `now`.
    pub fn fire(&mut self, now: u64) -> bool {
        match self.due {
            Some(due) if due <= now => {
                self.due = None;
                true
            }
            _ => false,
        }
    }

    /// When the pending firing is due, on the runtime's clock.
    pub fn due(&self) -> Option<u64> {
        self.due
    }

    pub fn is_scheduled(&self) -> bool {
        self.due.is_some()
    }
}
