//! Try-acquire guard ensuring at most one scan pass runs per process.
//!
//! This is an in-process flag, not a distributed lock: two processes sharing
//! a database can both hold their own guard at the same time.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` if a holder already exists.
    pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit { flight: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held for the duration of a pass; releases the guard on drop, including
/// on early return and unwinding.
#[derive(Debug)]
pub struct FlightPermit<'a> {
    flight: &'a SingleFlight,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.flight.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let flight = SingleFlight::new();
        let permit = flight.try_acquire().unwrap();
        assert!(flight.is_running());
        assert!(flight.try_acquire().is_none());

        drop(permit);
        assert!(!flight.is_running());
        assert!(flight.try_acquire().is_some());
    }

    #[test]
    fn released_on_early_exit() {
        fn pass(flight: &SingleFlight) -> Result<(), &'static str> {
            let _permit = flight.try_acquire().ok_or("busy")?;
            Err("storage down")
        }
        let flight = SingleFlight::new();
        assert_eq!(pass(&flight), Err("storage down"));
        assert!(!flight.is_running());
    }
}
