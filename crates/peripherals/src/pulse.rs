use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct PulseShared {
    count: AtomicU64,
    last_edge_ms: AtomicU64,
    observed: AtomicU64,
}

/// Edge counter shared between an interrupt handler and the control loop.
///
/// The interrupt side only calls [`PulseCounter::record_edge`]. The control
/// loop reads with [`PulseCounter::take_delta`] and may [`PulseCounter::reset`].
#[derive(Debug, Clone, Default)]
pub struct PulseCounter {
    shared: Arc<PulseShared>,
}

impl PulseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_edge(&self, now_ms: u64) {
        self.shared.count.fetch_add(1, Ordering::AcqRel);
        self.shared.last_edge_ms.store(now_ms, Ordering::Release);
    }

    pub fn total(&self) -> u64 {
        self.shared.count.load(Ordering::Acquire)
    }

    /// Time of the most recent edge, if any edge was seen.
    pub fn last_edge_ms(&self) -> Option<u64> {
        if self.total() == 0 {
            None
        } else {
            Some(self.shared.last_edge_ms.load(Ordering::Acquire))
        }
    }

    /// Edges since the previous call.
    pub fn take_delta(&self) -> u64 {
        let total = self.total();
        let previous = self.shared.observed.swap(total, Ordering::AcqRel);
        total.saturating_sub(previous)
    }

    pub fn reset(&self) {
        self.shared.count.store(0, Ordering::Release);
        self.shared.observed.store(0, Ordering::Release);
        self.shared.last_edge_ms.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn delta_is_since_last_read() {
        let c = PulseCounter::new();
        assert_eq!(c.last_edge_ms(), None);
        c.record_edge(10);
        c.record_edge(20);
        assert_eq!(c.take_delta(), 2);
        assert_eq!(c.take_delta(), 0);
        c.record_edge(30);
        assert_eq!(c.take_delta(), 1);
        assert_eq!(c.total(), 3);
        assert_eq!(c.last_edge_ms(), Some(30));
        c.reset();
        assert_eq!(c.total(), 0);
        assert_eq!(c.take_delta(), 0);
    }

    #[test]
    fn edges_from_another_thread_are_all_counted() {
        let c = PulseCounter::new();
        let isr = c.clone();
        let handle = thread::spawn(move || {
            for t in 0..1_000 {
                isr.record_edge(t);
            }
        });
        let mut seen = 0;
        while seen < 1_000 {
            seen += c.take_delta();
            thread::yield_now();
            if handle.is_finished() {
                seen += c.take_delta();
                break;
            }
        }
        handle.join().unwrap();
        assert_eq!(seen + c.take_delta(), 1_000);
    }
}
