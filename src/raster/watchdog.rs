use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Why the interpreter was stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    Deadline,
    StepBudget,
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interrupt::Cancelled => write!(f, "execution cancelled"),
            Interrupt::Deadline => write!(f, "time limit exceeded"),
            Interrupt::StepBudget => write!(f, "step budget exhausted"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drawing work (pixels and edge tests) allowed between clock reads.
const WORK_PER_CHECK: u64 = 1 << 16;

/// Cooperative bound on interpreted execution. The interpreter calls
/// [`Watchdog::tick`] once per statement and loop iteration, and
/// [`Watchdog::charge`] with the drawing work done inside a statement.
#[derive(Debug)]
pub struct Watchdog {
    cancel: CancelHandle,
    deadline: Option<Instant>,
    budget: u64,
    steps: u64,
    pending_work: u64,
}

impl Watchdog {
    pub fn new(timeout: Option<Duration>, budget: u64) -> Self {
        Self {
            cancel: CancelHandle::default(),
            deadline: timeout.map(|t| Instant::now() + t),
            budget,
            steps: 0,
            pending_work: 0,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, u64::MAX)
    }

    pub fn handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn tick(&mut self) -> Result<(), Interrupt> {
        self.steps += 1;
        if self.steps > self.budget {
            return Err(Interrupt::StepBudget);
        }
        // Clock and flag reads are amortised over small batches of steps.
        if self.steps % 256 == 0 {
            return self.check();
        }
        Ok(())
    }

    /// Accounts for pixel work; once enough has piled up the deadline and
    /// cancel flag are read, even in the middle of a statement.
    pub fn charge(&mut self, work: u64) -> Result<(), Interrupt> {
        self.pending_work = self.pending_work.saturating_add(work);
        if self.pending_work < WORK_PER_CHECK {
            return Ok(());
        }
        self.pending_work = 0;
        self.check()
    }

    fn check(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupt::Deadline);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhaustion() {
        let mut dog = Watchdog::new(None, 10);
        for _ in 0..10 {
            assert!(dog.tick().is_ok());
        }
        assert_eq!(dog.tick(), Err(Interrupt::StepBudget));
    }

    #[test]
    fn test_cancel_from_handle() {
        let mut dog = Watchdog::unbounded();
        dog.handle().cancel();
        let err = (0..1000).find_map(|_| dog.tick().err());
        assert_eq!(err, Some(Interrupt::Cancelled));
    }

    #[test]
    fn test_heavy_work_checks_deadline_between_ticks() {
        let mut dog = Watchdog::new(Some(Duration::ZERO), u64::MAX);
        assert!(dog.tick().is_ok());
        assert_eq!(dog.charge(10), Ok(()));
        assert_eq!(dog.charge(WORK_PER_CHECK), Err(Interrupt::Deadline));
    }

    #[test]
    fn test_deadline() {
        let mut dog = Watchdog::new(Some(Duration::ZERO), u64::MAX);
        let err = (0..1000).find_map(|_| dog.tick().err());
        assert_eq!(err, Some(Interrupt::Deadline));
    }
}
