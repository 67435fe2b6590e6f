use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::policy::LockMethod;

/// When a lock re-engages after the app loses and regains foreground focus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnlockTiming {
    Immediately,
    OnQuit,
    AfterMinutes(u32),
}

impl UnlockTiming {
    pub fn is_valid(&self) -> bool {
        !matches!(self, UnlockTiming::AfterMinutes(0))
    }

    /// Grace period after backgrounding. `None` means the lock only
    /// re-engages on a fresh launch.
    pub fn grace_period(&self) -> Option<Duration> {
        match self {
            UnlockTiming::Immediately => Some(Duration::ZERO),
            UnlockTiming::OnQuit => None,
            UnlockTiming::AfterMinutes(n) => Some(Duration::from_secs(u64::from(*n) * 60)),
        }
    }
}

impl fmt::Display for UnlockTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockTiming::Immediately => f.write_str("immediately"),
            UnlockTiming::OnQuit => f.write_str("on-quit"),
            UnlockTiming::AfterMinutes(n) => write!(f, "{n}m"),
        }
    }
}

impl FromStr for UnlockTiming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "immediately" => return Ok(UnlockTiming::Immediately),
            "on-quit" | "on_quit" | "onquit" => return Ok(UnlockTiming::OnQuit),
            _ => {}
        }
        let minutes = s
            .strip_suffix('m')
            .ok_or_else(|| format!("unknown timing `{s}` (expected immediately, on-quit or <n>m)"))?;
        let n: u32 = minutes
            .parse()
            .map_err(|_| format!("invalid minute count in `{s}`"))?;
        if n == 0 {
            return Err("timing must be at least one minute".to_string());
        }
        Ok(UnlockTiming::AfterMinutes(n))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct TimingOption {
    pub timing: UnlockTiming,
    pub title: &'static str,
}

/// A timing option with the currently applied one marked.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimingChoice {
    #[serde(flatten)]
    pub option: TimingOption,
    pub selected: bool,
}

const TIMING_OPTIONS: [TimingOption; 6] = [
    TimingOption {
        timing: UnlockTiming::Immediately,
        title: "Immediately",
    },
    TimingOption {
        timing: UnlockTiming::OnQuit,
        title: "On Quit",
    },
    TimingOption {
        timing: UnlockTiming::AfterMinutes(1),
        title: "After 1 minute",
    },
    TimingOption {
        timing: UnlockTiming::AfterMinutes(5),
        title: "After 5 minutes",
    },
    TimingOption {
        timing: UnlockTiming::AfterMinutes(15),
        title: "After 15 minutes",
    },
    TimingOption {
        timing: UnlockTiming::AfterMinutes(60),
        title: "After 1 hour",
    },
];

/// Selectable timings for a lock method. Both methods currently share the
/// same list.
pub fn timing_options(_method: LockMethod) -> &'static [TimingOption] {
    &TIMING_OPTIONS
}

pub fn mark_selected(method: LockMethod, current: Option<UnlockTiming>) -> Vec<TimingChoice> {
    timing_options(method)
        .iter()
        .map(|option| TimingChoice {
            option: *option,
            selected: current == Some(option.timing),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_forms() {
        assert_eq!("immediately".parse(), Ok(UnlockTiming::Immediately));
        assert_eq!("On-Quit".parse(), Ok(UnlockTiming::OnQuit));
        assert_eq!("15m".parse(), Ok(UnlockTiming::AfterMinutes(15)));
        assert!("0m".parse::<UnlockTiming>().is_err());
        assert!("soon".parse::<UnlockTiming>().is_err());
        assert_eq!(UnlockTiming::AfterMinutes(5).to_string(), "5m");
    }

    #[test]
    fn option_list_is_static_and_ordered() {
        let passcode = timing_options(LockMethod::Passcode);
        assert_eq!(passcode, timing_options(LockMethod::Biometrics));
        assert_eq!(passcode[0].timing, UnlockTiming::Immediately);
        assert_eq!(passcode[1].timing, UnlockTiming::OnQuit);
        assert!(passcode.iter().all(|o| o.timing.is_valid()));
    }

    #[test]
    fn marks_only_the_current_timing() {
        let choices = mark_selected(LockMethod::Passcode, Some(UnlockTiming::OnQuit));
        let selected: Vec<_> = choices.iter().filter(|c| c.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].option.title, "On Quit");

        assert!(mark_selected(LockMethod::Biometrics, None)
            .iter()
            .all(|c| !c.selected));
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&UnlockTiming::AfterMinutes(5)).unwrap();
        assert_eq!(json, r#"{"after_minutes":5}"#);
        let back: UnlockTiming = serde_json::from_str(r#""on_quit""#).unwrap();
        assert_eq!(back, UnlockTiming::OnQuit);
    }
}
