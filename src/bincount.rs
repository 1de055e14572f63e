use wide::{i32x8, CmpEq, CmpGt};

use crate::error::{Error, Result};

/// Ground-truth value whose pixels are excluded from every count.
pub const IGNORE_INDEX: u8 = 255;

const LANES: usize = 8;

/// Adds one to `hist[target * num_classes + pred]` for every pixel whose target is not
/// [`IGNORE_INDEX`].
///
/// `hist` is a flattened `num_classes x num_classes` matrix. Bin indices for eight pixels
/// are computed at once; only the final increments are scalar. `image` is used for error
/// reporting only. On error `hist` may hold a partial count, so callers count into a
/// scratch histogram.
pub fn bincount(
    hist: &mut [u64],
    target: &[u8],
    pred: &[u8],
    num_classes: usize,
    image: usize,
) -> Result<()> {
    debug_assert_eq!(target.len(), pred.len());
    debug_assert_eq!(hist.len(), num_classes * num_classes);

    let n = i32x8::splat(num_classes as i32);
    let ignore = i32x8::splat(IGNORE_INDEX as i32);

    let target_chunks = target.chunks_exact(LANES);
    let pred_chunks = pred.chunks_exact(LANES);
    let target_tail = target_chunks.remainder();
    let pred_tail = pred_chunks.remainder();

    for (chunk, (t, p)) in target_chunks.zip(pred_chunks).enumerate() {
        let tv = widen(t);
        let pv = widen(p);

        let ignored = tv.cmp_eq(ignore);
        let in_range = n.cmp_gt(tv) & n.cmp_gt(pv);
        if (ignored | in_range).move_mask() != 0xFF {
            return Err(first_invalid(t, p, num_classes, image, chunk * LANES));
        }

        let bins = (tv * n + pv).to_array();
        let ignored = ignored.to_array();
        for (bin, skip) in bins.iter().zip(ignored.iter()) {
            if *skip == 0 {
                hist[*bin as usize] += 1;
            }
        }
    }

    let base = target.len() - target_tail.len();
    for (offset, (&t, &p)) in target_tail.iter().zip(pred_tail.iter()).enumerate() {
        if let Some(bin) = bin_of(t, p, num_classes, image, base + offset)? {
            hist[bin] += 1;
        }
    }

    Ok(())
}

#[inline]
fn widen(labels: &[u8]) -> i32x8 {
    i32x8::from(std::array::from_fn::<i32, LANES, _>(|i| labels[i] as i32))
}

/// Bin of a single pixel, `None` when its target is ignored.
#[inline]
fn bin_of(t: u8, p: u8, num_classes: usize, image: usize, pixel: usize) -> Result<Option<usize>> {
    if t == IGNORE_INDEX {
        return Ok(None);
    }
    for value in [t, p] {
        if value as usize >= num_classes {
            return Err(Error::InvalidLabel {
                image,
                pixel,
                value,
                num_classes,
            });
        }
    }
    Ok(Some(t as usize * num_classes + p as usize))
}

fn first_invalid(t: &[u8], p: &[u8], num_classes: usize, image: usize, base: usize) -> Error {
    t.iter()
        .zip(p.iter())
        .enumerate()
        .find_map(|(lane, (&t, &p))| bin_of(t, p, num_classes, image, base + lane).err())
        .unwrap_or_else(|| Error::InvalidData("SIMD range check disagrees with scalar check".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_loop(target: &[u8], pred: &[u8], num_classes: usize) -> Vec<u64> {
        let mut hist = vec![0u64; num_classes * num_classes];
        for (&t, &p) in target.iter().zip(pred.iter()) {
            if t != IGNORE_INDEX {
                hist[t as usize * num_classes + p as usize] += 1;
            }
        }
        hist
    }

    #[test]
    fn matches_nested_loop_on_ragged_lengths() {
        let num_classes = 5;
        for len in [0, 1, 7, 8, 9, 23, 64, 101] {
            let target: Vec<u8> = (0..len)
                .map(|i| if i % 11 == 3 { IGNORE_INDEX } else { (i * 7 % num_classes) as u8 })
                .collect();
            let pred: Vec<u8> = (0..len).map(|i| (i * 3 % num_classes) as u8).collect();

            let mut hist = vec![0u64; num_classes * num_classes];
            bincount(&mut hist, &target, &pred, num_classes, 0).unwrap();
            assert_eq!(hist, nested_loop(&target, &pred, num_classes), "len = {len}");
        }
    }

    #[test]
    fn ignored_pixels_accept_any_prediction() {
        let target = [IGNORE_INDEX; 10];
        let pred = [200u8; 10];
        let mut hist = vec![0u64; 4];
        bincount(&mut hist, &target, &pred, 2, 0).unwrap();
        assert!(hist.iter().all(|&c| c == 0));
    }

    #[test]
    fn reports_out_of_range_target_in_simd_chunk() {
        let mut target = vec![0u8; 16];
        target[11] = 3;
        let pred = vec![0u8; 16];
        let mut hist = vec![0u64; 9];
        match bincount(&mut hist, &target, &pred, 3, 4) {
            Err(Error::InvalidLabel {
                image: 4,
                pixel: 11,
                value: 3,
                num_classes: 3,
            }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn reports_out_of_range_prediction_in_tail() {
        let target = vec![1u8; 10];
        let mut pred = vec![1u8; 10];
        pred[9] = IGNORE_INDEX;
        let mut hist = vec![0u64; 4];
        match bincount(&mut hist, &target, &pred, 2, 0) {
            Err(Error::InvalidLabel { pixel: 9, value: 255, .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
