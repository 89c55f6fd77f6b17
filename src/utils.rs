/// Bracketing binary search over a sorted slice.
///
/// Returns `(lo, hi)` such that `vals[lo] <= x <= vals[hi]` with
/// `hi - lo <= 1`. `lo` is `None` when `x` is below the first entry and
/// `hi` is `None` when `x` is above the last. On an exact hit both sides
/// return the same index.
pub fn binsearch(vals: &[f64], x: f64) -> (Option<usize>, Option<usize>) {
    if vals.is_empty() {
        return (None, None);
    }
    if x < vals[0] {
        return (None, Some(0));
    }
    if x > vals[vals.len() - 1] {
        return (Some(vals.len() - 1), None);
    }

    let mut lo = 0;
    let mut hi = vals.len() - 1;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if vals[mid] <= x {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    if vals[lo] == x {
        (Some(lo), Some(lo))
    } else if vals[hi] == x {
        (Some(hi), Some(hi))
    } else {
        (Some(lo), Some(hi))
    }
}
