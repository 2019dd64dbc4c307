/// Halves (by default) the learning rate once validation loss stops improving.
///
/// Mode `min` with a relative threshold: a loss counts as an improvement when
/// it is below `best * (1 - threshold)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceLrOnPlateau {
    pub factor: f32,
    pub patience: usize,
    pub threshold: f32,
    pub min_lr: f32,
    best: f32,
    bad_epochs: usize,
}

impl Default for ReduceLrOnPlateau {
    fn default() -> Self {
        Self::new(0.5, 5)
    }
}

impl ReduceLrOnPlateau {
    pub const fn new(factor: f32, patience: usize) -> Self {
        Self {
            factor,
            patience,
            threshold: 1e-4,
            min_lr: 0.0,
            best: f32::INFINITY,
            bad_epochs: 0,
        }
    }

    pub const fn best(&self) -> f32 {
        self.best
    }

    /// Records one epoch's metric and returns the learning rate to use next.
    pub fn step(&mut self, metric: f32, learning_rate: f32) -> f32 {
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.bad_epochs = 0;
            return learning_rate;
        }

        self.bad_epochs += 1;
        if self.bad_epochs > self.patience {
            self.bad_epochs = 0;
            return (learning_rate * self.factor).max(self.min_lr);
        }
        learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduces_after_patience_exhausted() {
        let mut scheduler = ReduceLrOnPlateau::default();
        let mut lr = 1e-3;

        lr = scheduler.step(1.0, lr);
        for _ in 0..5 {
            lr = scheduler.step(1.0, lr);
            assert_eq!(lr, 1e-3);
        }
        // sixth non-improving epoch
        lr = scheduler.step(1.0, lr);
        assert_eq!(lr, 5e-4);

        // counter restarts after a reduction
        for _ in 0..5 {
            lr = scheduler.step(1.0, lr);
        }
        assert_eq!(lr, 5e-4);
    }

    #[test]
    fn test_tiny_improvements_do_not_count() {
        let mut scheduler = ReduceLrOnPlateau::new(0.5, 0);
        let lr = scheduler.step(1.0, 1.0);
        assert_eq!(lr, 1.0);
        // within the relative threshold
        assert_eq!(scheduler.step(0.99995, lr), 0.5);
        assert_eq!(scheduler.best(), 1.0);
        assert_eq!(scheduler.step(0.5, 0.5), 0.5);
        assert_eq!(scheduler.best(), 0.5);
    }
}
