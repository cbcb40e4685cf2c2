use anyhow::{anyhow, Result};

use crate::detect::result::{DetectionCandidate, NormalizedBox};

/// Decode one darknet-style output tensor: `rows` x `cols` floats, each row
/// `cx, cy, w, h, <objectness...>, class scores...` with class scores starting
/// at `score_offset`.
///
/// The class is the argmax of the scores and the confidence is that maximum.
/// Rows with no score columns or a non-finite best score are skipped.
pub fn decode_rows(data: &[f32], cols: usize, score_offset: usize) -> Result<Vec<DetectionCandidate>> {
    if cols == 0 {
        return Ok(Vec::new());
    }
    if data.len() % cols != 0 {
        return Err(anyhow!(
            "output of {} values is not a whole number of {}-column rows",
            data.len(),
            cols
        ));
    }
    if score_offset < 4 || score_offset >= cols {
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for row in data.chunks_exact(cols) {
        let Some((class_index, confidence)) = best_score(&row[score_offset..]) else {
            continue;
        };
        candidates.push(DetectionCandidate {
            class_index,
            confidence,
            bbox: NormalizedBox::new(row[0], row[1], row[2], row[3]),
        });
    }
    Ok(candidates)
}

fn best_score(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, current)) if current >= score => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

/// Row width of an output tensor shape: the last dimension, with any leading
/// dimensions flattened into rows.
pub fn row_width(shape: &[usize]) -> Result<usize> {
    shape
        .last()
        .copied()
        .ok_or_else(|| anyhow!("model output has no dimensions"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_argmax_class_and_its_score() {
        // cx cy w h obj | s0 s1 s2
        let data = [
            0.5, 0.5, 0.2, 0.2, 0.9, 0.1, 0.7, 0.3, //
            0.1, 0.2, 0.3, 0.4, 0.8, 0.6, 0.0, 0.0,
        ];
        let candidates = decode_rows(&data, 8, 5).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].class_index, 1);
        assert!((candidates[0].confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(candidates[0].bbox, NormalizedBox::new(0.5, 0.5, 0.2, 0.2));
        assert_eq!(candidates[1].class_index, 0);
    }

    #[test]
    fn ragged_output_is_an_error() {
        assert!(decode_rows(&[0.0; 7], 8, 5).is_err());
    }

    #[test]
    fn rows_without_scores_decode_to_nothing() {
        assert!(decode_rows(&[0.0; 10], 5, 5).unwrap().is_empty());
    }

    #[test]
    fn row_width_uses_last_dimension() {
        assert_eq!(row_width(&[1, 2535, 85]).unwrap(), 85);
        assert!(row_width(&[]).is_err());
    }
}
