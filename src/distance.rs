//! Distance functions the index can be built over
//!
//! The tree only requires a metric: total, symmetric, non-negative and
//! satisfying the triangle inequality. Covering-radius pruning is unsound
//! for anything weaker.

/// A metric over objects of type `O`
///
/// `name` identifies the function; a query carrying a function with another
/// name is answered with "not applicable" instead of a result.
pub trait DistanceFunction<O>: Send + Sync {
    fn name(&self) -> &str;

    fn distance(&self, a: &O, b: &O) -> f64;
}

/// Euclidean (L2) distance between equal-length vectors
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl DistanceFunction<Vec<f64>> for EuclideanDistance {
    fn name(&self) -> &str {
        "euclidean"
    }

    #[inline]
    fn distance(&self, a: &Vec<f64>, b: &Vec<f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }
}

/// Manhattan (L1) distance between equal-length vectors
#[derive(Debug, Clone, Copy, Default)]
pub struct ManhattanDistance;

impl DistanceFunction<Vec<f64>> for ManhattanDistance {
    fn name(&self) -> &str {
        "manhattan"
    }

    #[inline]
    fn distance(&self, a: &Vec<f64>, b: &Vec<f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
    }
}

/// Absolute difference between scalars
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsoluteDistance;

impl DistanceFunction<f64> for AbsoluteDistance {
    fn name(&self) -> &str {
        "absolute"
    }

    #[inline]
    fn distance(&self, a: &f64, b: &f64) -> f64 {
        (a - b).abs()
    }
}
