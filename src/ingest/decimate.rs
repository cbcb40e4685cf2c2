use anyhow::{anyhow, Result};

/// Forwards every `skip`-th decoded frame downstream.
///
/// Positions count from 1, so with `skip = 3` frames 3, 6, 9, ... pass.
#[derive(Clone, Debug)]
pub struct FrameDecimator {
    skip: u64,
    counter: u64,
}

impl FrameDecimator {
    pub fn new(skip: u32) -> Result<Self> {
        if skip == 0 {
            return Err(anyhow!("frame skip must be greater than zero"));
        }
        Ok(Self {
            skip: skip as u64,
            counter: 0,
        })
    }

    /// Count one decoded frame. Returns its position when it should be
    /// processed, `None` when it is discarded.
    pub fn accept(&mut self) -> Option<u64> {
        self.counter += 1;
        if self.counter % self.skip == 0 {
            Some(self.counter)
        } else {
            None
        }
    }

    /// Frames counted so far.
    pub fn seen(&self) -> u64 {
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_skip_is_rejected() {
        assert!(FrameDecimator::new(0).is_err());
    }

    #[test]
    fn skip_of_one_passes_everything() {
        let mut decimator = FrameDecimator::new(1).unwrap();
        let passed: Vec<u64> = (0..5).filter_map(|_| decimator.accept()).collect();
        assert_eq!(passed, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn passes_floor_m_over_n_frames_at_multiples_of_n() {
        for skip in 2..=5u32 {
            for total in 0..=23u64 {
                let mut decimator = FrameDecimator::new(skip).unwrap();
                let passed: Vec<u64> = (0..total).filter_map(|_| decimator.accept()).collect();
                assert_eq!(passed.len() as u64, total / skip as u64);
                assert!(passed.iter().all(|pos| pos % skip as u64 == 0));
                assert_eq!(decimator.seen(), total);
            }
        }
    }
}
