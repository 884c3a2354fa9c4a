//! Quarter schedule and quarter-start observers.
//!
//! A cycle of `duration` seconds is split into four equal quarters. The
//! current quarter is derived from the wall clock alone:
//! `floor((now - start) / (duration / 4)) + 1`.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quarter {
    Q1 = 1,
    Q2 = 2,
    Q3 = 3,
    Q4 = 4,
}

impl Quarter {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u64) -> Option<Self> {
        match n {
            1 => Some(Self::Q1),
            2 => Some(Self::Q2),
            3 => Some(Self::Q3),
            4 => Some(Self::Q4),
            _ => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self as u64 + 1)
    }

    /// Gossip is accepted and forwarded only in the first half of a cycle.
    pub fn accepts_gossip(self) -> bool {
        matches!(self, Self::Q1 | Self::Q2)
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.number())
    }
}

/// Where the clock sits relative to a cycle that starts at `start_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    /// Before the cycle starts.
    Before,
    Within(Quarter),
    /// Past the cycle's end by `cycles` whole cycles (zero means the
    /// following cycle has started but not finished).
    After { cycles: u64 },
}

/// Locate `now_ms` within the cycle `[start_ms, start_ms + duration_ms)`.
pub fn position(now_ms: u64, start_ms: u64, duration_ms: u64) -> Position {
    if now_ms < start_ms || duration_ms == 0 {
        return Position::Before;
    }
    let elapsed = now_ms - start_ms;
    if elapsed >= duration_ms {
        return Position::After {
            cycles: (elapsed - duration_ms) / duration_ms,
        };
    }
    let quarter_ms = (duration_ms / 4).max(1);
    let q = (elapsed / quarter_ms + 1).min(4);
    Position::Within(Quarter::from_number(q).unwrap_or(Quarter::Q4))
}

/// Millisecond at which `quarter` of the cycle begins.
pub fn quarter_start_ms(start_ms: u64, duration_ms: u64, quarter: Quarter) -> u64 {
    start_ms + duration_ms * (quarter.number() as u64 - 1) / 4
}

/// Published at the start of each quarter, before the quarter's own work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuarterEvent {
    pub quarter: Quarter,
    pub counter: u64,
    pub start_ms: u64,
}

type Observer = Box<dyn FnMut(&QuarterEvent) + Send>;

/// Subscribers to quarter starts, called in subscription order.
#[derive(Default)]
pub struct QuarterObservers {
    observers: Vec<Observer>,
}

impl QuarterObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    pub fn emit(&mut self, event: &QuarterEvent) {
        for observer in &mut self.observers {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for QuarterObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuarterObservers")
            .field("len", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn quarters_split_duration_evenly() {
        let start = 1_000_000;
        let dur = 60_000;
        assert_eq!(position(start, start, dur), Position::Within(Quarter::Q1));
        assert_eq!(position(start + 14_999, start, dur), Position::Within(Quarter::Q1));
        assert_eq!(position(start + 15_000, start, dur), Position::Within(Quarter::Q2));
        assert_eq!(position(start + 30_000, start, dur), Position::Within(Quarter::Q3));
        assert_eq!(position(start + 59_999, start, dur), Position::Within(Quarter::Q4));
    }

    #[test]
    fn before_and_after() {
        assert_eq!(position(10, 100, 60), Position::Before);
        assert_eq!(position(160, 100, 60), Position::After { cycles: 0 });
        assert_eq!(position(100 + 60 * 3 + 5, 100, 60), Position::After { cycles: 2 });
    }

    #[test]
    fn quarter_starts() {
        assert_eq!(quarter_start_ms(0, 60_000, Quarter::Q1), 0);
        assert_eq!(quarter_start_ms(0, 60_000, Quarter::Q3), 30_000);
        assert_eq!(Quarter::Q4.next(), None);
        assert!(Quarter::Q2.accepts_gossip());
        assert!(!Quarter::Q3.accepts_gossip());
    }

    #[test]
    fn observers_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut obs = QuarterObservers::new();
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            obs.subscribe(Box::new(move |e: &QuarterEvent| {
                seen.lock().unwrap().push(format!("{tag}{}", e.quarter));
            }));
        }
        obs.emit(&QuarterEvent {
            quarter: Quarter::Q2,
            counter: 4,
            start_ms: 0,
        });
        assert_eq!(*seen.lock().unwrap(), vec!["aQ2", "bQ2"]);
    }
}
