//! Distance to similarity conversion.
//!
//! ANN backends report an opaque distance where smaller means closer. The
//! serving layer exposes a bounded similarity instead:
//!
//! ```text
//! score = clamp(1 / (1 + distance), 0, 1)
//! ```
//!
//! Distance `0` maps to `1.0` and the score never increases with distance.
//! Negative distances (signed inner-product backends) are treated as `0`,
//! and `NaN` maps to the least relevant score.

/// Convert a non-negative distance into a similarity in `[0.0, 1.0]`.
pub fn similarity(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    let d = distance.max(0.0);
    (1.0 / (1.0 + d)).clamp(0.0, 1.0)
}
