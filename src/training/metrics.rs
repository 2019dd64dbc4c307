use ndarray::prelude::*;

use crate::errors::{Result, SegError};
use crate::pipeline::argmax_channels;

fn check_shapes(logits: &ArrayView4<f32>, targets: &ArrayView3<i64>) -> Result<()> {
    let (batch, classes, height, width) = logits.dim();
    if targets.dim() != (batch, height, width) || classes == 0 {
        return Err(SegError::inference(
            "metric computation",
            format!(
                "logits {:?} do not match targets {:?}",
                logits.shape(),
                targets.shape()
            ),
        ));
    }
    Ok(())
}

/// Mean per-pixel cross entropy of `(B, C, H, W)` logits against `(B, H, W)`
/// class targets.
pub fn cross_entropy(logits: ArrayView4<f32>, targets: ArrayView3<i64>) -> Result<f32> {
    check_shapes(&logits, &targets)?;
    let classes = logits.len_of(Axis(1));
    let mut total = 0.0_f64;

    for (b, sample) in logits.outer_iter().enumerate() {
        for ((y, x), &target) in targets.index_axis(Axis(0), b).indexed_iter() {
            let target = usize::try_from(target)
                .ok()
                .filter(|&t| t < classes)
                .ok_or_else(|| {
                    SegError::inference(
                        "cross entropy",
                        format!("target class {target} out of range"),
                    )
                })?;
            let scores = sample.slice(s![.., y, x]);
            let max = scores.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let log_sum_exp = max + scores.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
            total += f64::from(log_sum_exp - scores[target]);
        }
    }

    Ok((total / targets.len().max(1) as f64) as f32)
}

/// `(correct, total)` pixel counts; arg-max ties go to the lowest class.
pub fn pixel_accuracy(logits: ArrayView4<f32>, targets: ArrayView3<i64>) -> Result<(usize, usize)> {
    check_shapes(&logits, &targets)?;
    let correct = logits
        .outer_iter()
        .zip(targets.outer_iter())
        .map(|(sample, target)| {
            argmax_channels(sample)
                .iter()
                .zip(target.iter())
                .filter(|&(predicted, target)| i64::from(*predicted) == *target)
                .count()
        })
        .sum();
    Ok((correct, targets.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_logits_loss_is_log_classes() -> Result<()> {
        let logits = Array4::<f32>::zeros((2, 4, 3, 3));
        let targets = Array3::<i64>::from_elem((2, 3, 3), 1);
        let loss = cross_entropy(logits.view(), targets.view())?;
        assert!((loss - 4.0_f32.ln()).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_large_logits_stay_finite() -> Result<()> {
        let mut logits = Array4::<f32>::zeros((1, 2, 1, 1));
        logits[[0, 0, 0, 0]] = 1000.0;
        let targets = Array3::<i64>::zeros((1, 1, 1));
        let loss = cross_entropy(logits.view(), targets.view())?;
        assert!(loss.is_finite() && loss < 1e-6);

        let wrong = Array3::<i64>::ones((1, 1, 1));
        let loss = cross_entropy(logits.view(), wrong.view())?;
        assert!((loss - 1000.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_pixel_accuracy() -> Result<()> {
        let mut logits = Array4::<f32>::zeros((1, 3, 1, 4));
        logits[[0, 2, 0, 0]] = 1.0;
        logits[[0, 1, 0, 1]] = 1.0;
        // pixels 2 and 3 tie, predicting class 0
        let targets = array![[[2_i64, 1, 0, 2]]];
        assert_eq!(pixel_accuracy(logits.view(), targets.view())?, (3, 4));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_targets() {
        let logits = Array4::<f32>::zeros((1, 2, 2, 2));
        let out_of_range = Array3::<i64>::from_elem((1, 2, 2), 5);
        assert!(cross_entropy(logits.view(), out_of_range.view()).is_err());

        let wrong_shape = Array3::<i64>::zeros((1, 3, 2));
        assert!(pixel_accuracy(logits.view(), wrong_shape.view()).is_err());
    }
}
