use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};


/// Source of the current time for staleness windows.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that moves only when told to.
#[derive(Clone, Debug)]
pub struct ManualClock(Rc<ManualClockData>);

#[derive(Debug)]
struct ManualClockData {
    origin: Instant,
    elapsed: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self(Rc::new(ManualClockData {
            origin: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
        }))
    }
    pub fn advance(&self, duration: Duration) {
        self.0.elapsed.set(self.0.elapsed.get() + duration);
    }
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed.get()
    }
}
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.0.origin + self.0.elapsed.get()
    }
}
