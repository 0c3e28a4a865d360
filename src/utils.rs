use nalgebra::DMatrix;

/// Find local maxima of `map`, strongest first.
///
/// A position is kept when its value is at least `threshold` and no other
/// value within `min_distance` (chessboard metric) is larger. Among equal
/// values in one neighbourhood only the first in row-major order survives,
/// so two returned maxima are always more than `min_distance` apart.
pub fn peak_local_max(map: &DMatrix<f64>, min_distance: usize, threshold: f64) -> Vec<(usize, usize)> {
    let (rows, cols) = map.shape();
    let mut found: Vec<(f64, usize, usize)> = Vec::new();

    for r in 0..rows {
        for c in 0..cols {
            let center = map[(r, c)];
            if !center.is_finite() || center < threshold {
                continue;
            }

            let r0 = r.saturating_sub(min_distance);
            let r1 = (r + min_distance).min(rows - 1);
            let c0 = c.saturating_sub(min_distance);
            let c1 = (c + min_distance).min(cols - 1);

            let mut is_max = true;
            'n: for rr in r0..=r1 {
                for cc in c0..=c1 {
                    if rr == r && cc == c {
                        continue;
                    }
                    let other = map[(rr, cc)];
                    let before = (rr, cc) < (r, c);
                    if other > center || (before && other == center) {
                        is_max = false;
                        break 'n;
                    }
                }
            }

            if is_max {
                found.push((center, r, c));
            }
        }
    }

    found.sort_by(|a, b| b.0.total_cmp(&a.0));
    found.into_iter().map(|(_, r, c)| (r, c)).collect()
}

/// Squared Euclidean distance between two coordinate vectors.
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_maximum() {
        let mut map = DMatrix::<f64>::zeros(10, 10);
        map[(4, 6)] = 5.0;
        map[(4, 5)] = 3.0;
        assert_eq!(peak_local_max(&map, 3, 1.0), vec![(4, 6)]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut map = DMatrix::<f64>::zeros(5, 5);
        map[(2, 2)] = 27.0;
        assert_eq!(peak_local_max(&map, 1, 27.0), vec![(2, 2)]);
        assert!(peak_local_max(&map, 1, 27.5).is_empty());
    }

    #[test]
    fn test_close_maxima_suppressed_and_sorted() {
        let mut map = DMatrix::<f64>::zeros(20, 20);
        map[(5, 5)] = 10.0;
        map[(5, 7)] = 8.0; // within 3 px of the stronger one
        map[(15, 15)] = 12.0;
        assert_eq!(peak_local_max(&map, 3, 1.0), vec![(15, 15), (5, 5)]);
    }

    #[test]
    fn test_plateau_yields_one_peak() {
        let mut map = DMatrix::<f64>::zeros(8, 8);
        map[(3, 3)] = 4.0;
        map[(3, 4)] = 4.0;
        map[(4, 3)] = 4.0;
        assert_eq!(peak_local_max(&map, 3, 1.0), vec![(3, 3)]);
    }

    #[test]
    fn test_flat_map_below_threshold() {
        let map = DMatrix::<f64>::zeros(6, 6);
        assert!(peak_local_max(&map, 3, 0.1).is_empty());
    }

    #[test]
    fn test_squared_distance() {
        assert_eq!(squared_distance(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(squared_distance(&[1.0], &[1.0]), 0.0);
    }
}
