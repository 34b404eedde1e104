use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Single-flight guard for poll cycles.
///
/// `try_enter` hands out at most one [`CyclePermit`] at a time; the gate
/// reopens when the permit is dropped, whatever path the cycle exits by.
#[derive(Debug, Default)]
pub struct CycleGate {
    busy: AtomicBool,
    started: AtomicU64,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Option<CyclePermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let number = self.started.fetch_add(1, Ordering::Relaxed) + 1;
        Some(CyclePermit { gate: self, number })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of cycles that have been admitted so far.
    pub fn cycles_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct CyclePermit<'a> {
    gate: &'a CycleGate,
    number: u64,
}

impl CyclePermit<'_> {
    /// 1-based sequence number of the admitted cycle.
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl Drop for CyclePermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}
