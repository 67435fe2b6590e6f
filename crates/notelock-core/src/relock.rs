use std::time::Duration;

use crate::policy::{LockMethod, PolicySnapshot};
use crate::timing::UnlockTiming;

/// App lifecycle event after which locks may need to be re-engaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTrigger {
    /// Cold start after the app was quit.
    Launch,
    /// Returned to the foreground after spending `background` in the
    /// background.
    Resume { background: Duration },
}

/// Lock methods that must be satisfied before the app is usable again,
/// passcode first.
pub fn required_locks(snapshot: &PolicySnapshot, trigger: LockTrigger) -> Vec<LockMethod> {
    LockMethod::ALL
        .into_iter()
        .filter(|method| {
            snapshot
                .lock(*method)
                .effective_timing()
                .is_some_and(|timing| requires_unlock(timing, trigger))
        })
        .collect()
}

fn requires_unlock(timing: UnlockTiming, trigger: LockTrigger) -> bool {
    match trigger {
        LockTrigger::Launch => true,
        LockTrigger::Resume { background } => match timing.grace_period() {
            Some(grace) => background >= grace,
            None => false,
        },
    }
}
