//! Small vector helpers shared by the embedding service and the
//! population stores.  Everything operates on `Array1<f64>` unit (or
//! near-unit) vectors; degenerate zero-norm inputs are treated as
//! maximally distant rather than propagating NaN.
use ndarray::Array1;

/// Cosine distance `1 - cos(a, b)` in `[0, 2]`.
pub fn cosine_distance(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let dot = a.dot(b);
    let norm = a.dot(a).sqrt() * b.dot(b).sqrt();
    if norm <= 0.0 || !norm.is_finite() {
        return 1.0;
    }
    (1.0 - dot / norm).clamp(0.0, 2.0)
}

/// Normalise `v` to unit length in place.  Zero vectors are left as-is.
pub fn normalize(v: &mut Array1<f64>) {
    let norm = v.dot(v).sqrt();
    if norm > 0.0 && norm.is_finite() {
        v.mapv_inplace(|x| x / norm);
    }
}

/// Empirical quantile of `values` at `q ∈ [0, 1]` (nearest-rank over a
/// sorted copy).  Returns `None` on an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[pos.min(sorted.len() - 1)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_cosine_distance_orthogonal_and_parallel() {
        let x = array![1.0, 0.0];
        let y = array![0.0, 1.0];
        assert!((cosine_distance(&x, &y) - 1.0).abs() < 1e-12);
        assert!(cosine_distance(&x, &x).abs() < 1e-12);
        let neg = array![-1.0, 0.0];
        assert!((cosine_distance(&x, &neg) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_distance_zero_vector_is_neutral() {
        let x = array![1.0, 0.0];
        let z = array![0.0, 0.0];
        assert_eq!(cosine_distance(&x, &z), 1.0);
    }

    #[test]
    fn test_normalize_unit_norm() {
        let mut v = array![3.0, 4.0];
        normalize(&mut v);
        assert!((v.dot(&v).sqrt() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_quantile_nearest_rank() {
        let values = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 0.5), Some(3.0));
        assert_eq!(quantile(&values, 1.0), Some(5.0));
        assert_eq!(quantile(&[], 0.5), None);
    }
}
