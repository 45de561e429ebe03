use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically non-decreasing progress signal in `[0, 1]`, readable from
/// any thread at any time (spec §3 "Progress").
///
/// Stored as bits of an `f64` inside an `AtomicU64` rather than behind a
/// lock: readers never block a producer thread that is mid-emission, which
/// matters for push pipes whose producer threads call `advance` far more
/// often than any reader calls `get`.
#[derive(Debug)]
pub struct Progress(AtomicU64);

impl Progress {
    pub fn new() -> Self {
        Self(AtomicU64::new(0f64.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Sets progress to `value`, clamped to `[0, 1]` and to be no less than
    /// the current value — the monotonicity invariant tested in spec §8.
    pub fn advance(&self, value: f64) {
        let clamped = value.clamp(0.0, 1.0);
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let current_value = f64::from_bits(current);
            if clamped <= current_value {
                return;
            }
            match self.0.compare_exchange_weak(
                current,
                clamped.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn complete(&self) {
        self.advance(1.0);
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Rescales an upstream progress reading `p` into `[from, to]`, then
/// quantizes it to the nearest multiple of `step` (spec §6: "a progress
/// transformer (`from`, `to`, `step`) that rescales and quantizes progress
/// signals for downstream listeners").
#[derive(Debug, Clone, Copy)]
pub struct ProgressRescale {
    from: f64,
    to: f64,
    step: f64,
}

impl ProgressRescale {
    pub fn new(from: f64, to: f64, step: f64) -> Self {
        assert!(from <= to, "ProgressRescale requires from <= to");
        assert!(step > 0.0, "ProgressRescale requires a positive step");
        Self { from, to, step }
    }

    pub fn apply(&self, upstream: f64) -> f64 {
        let upstream = upstream.clamp(0.0, 1.0);
        let scaled = self.from + upstream * (self.to - self.from);
        let quantized = (scaled / self.step).round() * self.step;
        quantized.clamp(self.from.min(self.to), self.from.max(self.to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_decreases() {
        let progress = Progress::new();
        progress.advance(0.5);
        progress.advance(0.2);
        assert_eq!(progress.get(), 0.5);
        progress.advance(0.8);
        assert_eq!(progress.get(), 0.8);
    }

    #[test]
    fn progress_clamps_to_unit_interval() {
        let progress = Progress::new();
        progress.advance(5.0);
        assert_eq!(progress.get(), 1.0);
    }

    #[test]
    fn rescale_quantizes_to_step() {
        let rescale = ProgressRescale::new(0.0, 1.0, 0.25);
        assert_eq!(rescale.apply(0.1), 0.0);
        assert_eq!(rescale.apply(0.4), 0.5);
        assert_eq!(rescale.apply(1.0), 1.0);
    }

    #[test]
    fn rescale_maps_into_sub_range() {
        let rescale = ProgressRescale::new(0.5, 0.75, 0.05);
        let value = rescale.apply(1.0);
        assert!((0.5..=0.75).contains(&value));
    }
}
