use tracing::warn;

/// Cosine similarity in [-1, 1]. Mismatched dimensions and zero vectors
/// yield 0.0 rather than an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        warn!(
            a_len = a.len(),
            b_len = b.len(),
            "embedding dimension mismatch; returning zero similarity"
        );
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Clamps a raw similarity into [0, 1]; NaN becomes 0.
pub fn clamp_similarity(similarity: f64) -> f64 {
    if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors_score_one() {
        let v = [0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_opposite_vectors_clamp_to_zero() {
        let raw = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((raw + 1.0).abs() < 1e-9);
        assert_eq!(clamp_similarity(raw), 0.0);
    }

    #[test]
    fn test_known_angle() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.8, 0.6]);
        assert!((sim - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_and_dimension_mismatch_are_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_clamp_handles_nan() {
        assert_eq!(clamp_similarity(f64::NAN), 0.0);
        assert_eq!(clamp_similarity(1.5), 1.0);
    }
}
