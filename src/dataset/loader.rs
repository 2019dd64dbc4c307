use ndarray::{prelude::*, stack};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::dataset::adapter::{LandCoverDataset, Sample};
use crate::dataset::{Batch, BatchPlan};
use crate::errors::{Result, SegError};
use crate::traits::BatchSource;

/// Splits a dataset into batches, optionally reshuffled every epoch.
///
/// Each sample gets its own seed in the plan so augmentation is reproducible
/// no matter which rayon worker decodes it.
#[derive(Debug)]
pub struct DataLoader {
    dataset: LandCoverDataset,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl DataLoader {
    pub fn new(dataset: LandCoverDataset, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn dataset(&self) -> &LandCoverDataset {
        &self.dataset
    }

    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }
}

/// Shuffled (or sequential) index order chunked into batch plans.
pub fn plan_batches<R: Rng + ?Sized>(
    len: usize,
    batch_size: usize,
    shuffle: bool,
    rng: &mut R,
) -> Vec<BatchPlan> {
    let mut order: Vec<usize> = (0..len).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
        .chunks(batch_size.max(1))
        .map(|indices| BatchPlan {
            indices: indices.to_vec(),
            seeds: indices.iter().map(|_| rng.gen()).collect(),
        })
        .collect()
}

/// Stacks samples into `(B, 3, H, W)` images and `(B, H, W)` class targets.
pub fn collate(samples: &[Sample]) -> Result<Batch> {
    if samples.is_empty() {
        return Err(SegError::Dataset {
            reason: "cannot collate an empty batch".to_string(),
        });
    }
    let images: Vec<_> = samples.iter().map(|s| s.image.view()).collect();
    let masks: Vec<_> = samples.iter().map(|s| s.mask.view()).collect();

    Ok(Batch {
        images: stack(Axis(0), &images)?,
        masks: stack(Axis(0), &masks)?.mapv(i64::from),
    })
}

impl BatchSource for DataLoader {
    fn len(&self) -> usize {
        self.dataset.len()
    }

    fn plan_epoch(&mut self) -> Vec<BatchPlan> {
        plan_batches(self.dataset.len(), self.batch_size, self.shuffle, &mut self.rng)
    }

    fn load_batch(&self, plan: &BatchPlan) -> Result<Batch> {
        let samples = plan
            .indices
            .par_iter()
            .zip(plan.seeds.par_iter())
            .map(|(&index, &seed)| {
                let mut rng = StdRng::seed_from_u64(seed);
                self.dataset.get(index, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;
        collate(&samples)
    }
}

/// Pre-built samples held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryBatches {
    samples: Vec<Sample>,
    batch_size: usize,
}

impl InMemoryBatches {
    pub fn new(samples: Vec<Sample>, batch_size: usize) -> Self {
        Self {
            samples,
            batch_size: batch_size.max(1),
        }
    }
}

impl BatchSource for InMemoryBatches {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn plan_epoch(&mut self) -> Vec<BatchPlan> {
        let mut rng = StdRng::seed_from_u64(0);
        plan_batches(self.samples.len(), self.batch_size, false, &mut rng)
    }

    fn load_batch(&self, plan: &BatchPlan) -> Result<Batch> {
        let samples: Vec<_> = plan
            .indices
            .iter()
            .map(|&i| {
                self.samples.get(i).cloned().ok_or_else(|| SegError::Dataset {
                    reason: format!("sample index {i} out of range"),
                })
            })
            .collect::<Result<_>>()?;
        collate(&samples)
    }
}
