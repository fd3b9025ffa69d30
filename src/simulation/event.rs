//! Simulation events

use crate::storage::UnitId;
use std::fmt;

/// Kind of a simulated event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Failure,
    Recovered,
    EagerRecoveryStart,
    EagerRecoveryInstallment,
    LatentDefect,
    LatentRecovered,
    ScrubStart,
    ScrubComplete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Failure => "Failure",
            EventKind::Recovered => "Recovered",
            EventKind::EagerRecoveryStart => "EagerRecoveryStart",
            EventKind::EagerRecoveryInstallment => "EagerRecoveryInstallment",
            EventKind::LatentDefect => "LatentDefect",
            EventKind::LatentRecovered => "LatentRecovered",
            EventKind::ScrubStart => "ScrubStart",
            EventKind::ScrubComplete => "ScrubComplete",
        };
        write!(f, "{}", name)
    }
}

/// Machine failure sub-type carried by Failure/Recovered events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureCause {
    /// Propagated from a rack or datacenter outage
    #[default]
    Inherited,
    /// Recovers within the machine fail timeout
    ShortTransient,
    /// Outlasts the fail timeout but keeps its disks
    LongTransient,
    /// Takes its disks down with it
    Permanent,
}

impl FailureCause {
    /// Numeric discriminator used in event logs
    pub fn code(&self) -> u8 {
        match self {
            FailureCause::Inherited => 0,
            FailureCause::ShortTransient => 1,
            FailureCause::LongTransient => 2,
            FailureCause::Permanent => 3,
        }
    }
}

/// What an event applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Unit(UnitId),
    /// A batch of eager repairs owned by the handler
    Installment(usize),
}

impl fmt::Display for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTarget::Unit(id) => write!(f, "unit#{}", id),
            EventTarget::Installment(id) => write!(f, "installment#{}", id),
        }
    }
}

/// An immutable simulated event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub time: f64,
    pub target: EventTarget,
    /// When the target is expected back, used to project bandwidth
    pub next_recovery_time: Option<f64>,
    pub cause: FailureCause,
    /// Kept in the timeline but excluded from statistics
    pub ignore: bool,
}

impl Event {
    pub fn new(kind: EventKind, time: f64, unit: UnitId) -> Self {
        Self {
            kind,
            time,
            target: EventTarget::Unit(unit),
            next_recovery_time: None,
            cause: FailureCause::default(),
            ignore: false,
        }
    }

    pub fn installment(time: f64, installment: usize) -> Self {
        Self {
            target: EventTarget::Installment(installment),
            ..Self::new(EventKind::EagerRecoveryInstallment, time, 0)
        }
    }

    pub fn with_next_recovery(mut self, time: f64) -> Self {
        self.next_recovery_time = Some(time);
        self
    }

    pub fn with_cause(mut self, cause: FailureCause) -> Self {
        self.cause = cause;
        self
    }

    pub fn ignored(mut self, ignore: bool) -> Self {
        self.ignore = ignore;
        self
    }

    /// The hardware unit this event targets, if any
    pub fn unit(&self) -> Option<UnitId> {
        match self.target {
            EventTarget::Unit(id) => Some(id),
            EventTarget::Installment(_) => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} {} {}", self.time, self.kind, self.target)?;
        if self.cause != FailureCause::Inherited {
            write!(f, " info={}", self.cause.code())?;
        }
        if let Some(next) = self.next_recovery_time {
            write!(f, " next_recovery={:.6}", next)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = Event::new(EventKind::Failure, 12.5, 4)
            .with_cause(FailureCause::LongTransient)
            .with_next_recovery(20.0);
        assert_eq!(
            event.to_string(),
            "12.500000 Failure unit#4 info=2 next_recovery=20.000000"
        );
        assert_eq!(event.unit(), Some(4));
        assert_eq!(Event::installment(3.0, 7).unit(), None);
    }
}
