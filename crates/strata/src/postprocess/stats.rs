//! Per-bin statistics.

/// Statistic computed over the numeric values of one bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statistic {
    /// First value.
    FirstSample,
    /// Last value.
    LastSample,
    /// First value; empty bins repeat the previous bin.
    FirstFill,
    /// Last value; empty bins repeat the previous bin.
    LastFill,
    /// Arithmetic mean.
    Mean,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Median (mean of the two middle values for even counts).
    Median,
    /// Sample standard deviation.
    Std,
    /// Sample variance.
    Variance,
    /// Population variance.
    PopVariance,
    /// Number of values.
    Count,
    /// Standard deviation divided by the mean.
    Jitter,
    /// Sample excess kurtosis.
    Kurtosis,
    /// Sample skewness.
    Skewness,
}

impl Statistic {
    /// Looks up a statistic by its directive identifier.
    pub fn from_identity(identity: &str) -> Option<Self> {
        let statistic = match identity {
            "firstSample" => Self::FirstSample,
            "lastSample" => Self::LastSample,
            "firstFill" => Self::FirstFill,
            "lastFill" => Self::LastFill,
            "mean" => Self::Mean,
            "min" => Self::Min,
            "max" => Self::Max,
            "median" => Self::Median,
            "std" => Self::Std,
            "variance" => Self::Variance,
            "popvariance" => Self::PopVariance,
            "count" => Self::Count,
            "jitter" => Self::Jitter,
            "kurtosis" => Self::Kurtosis,
            "skewness" => Self::Skewness,
            _ => return None,
        };
        Some(statistic)
    }

    /// Returns the directive identifier.
    pub fn identity(self) -> &'static str {
        match self {
            Self::FirstSample => "firstSample",
            Self::LastSample => "lastSample",
            Self::FirstFill => "firstFill",
            Self::LastFill => "lastFill",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::Std => "std",
            Self::Variance => "variance",
            Self::PopVariance => "popvariance",
            Self::Count => "count",
            Self::Jitter => "jitter",
            Self::Kurtosis => "kurtosis",
            Self::Skewness => "skewness",
        }
    }

    /// Computes the statistic; `None` for an empty bin.
    ///
    /// Higher moments are `NaN` when the bin is too small to estimate them and
    /// zero when every value is identical.
    pub fn compute(self, values: &[f64]) -> Option<f64> {
        let first = *values.first()?;
        let last = *values.last()?;
        let n = values.len() as f64;
        let value = match self {
            Self::FirstSample | Self::FirstFill => first,
            Self::LastSample | Self::LastFill => last,
            Self::Mean => mean(values),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Median => median(values),
            Self::Std => sample_variance(values).sqrt(),
            Self::Variance => sample_variance(values),
            Self::PopVariance => central_moment(values, 2),
            Self::Count => n,
            Self::Jitter => sample_variance(values).sqrt() / mean(values),
            Self::Kurtosis => {
                if values.len() < 4 {
                    f64::NAN
                } else {
                    let variance = sample_variance(values);
                    if variance == 0.0 {
                        0.0
                    } else {
                        let sum: f64 = standardized(values, variance).map(|z| z.powi(4)).sum();
                        n * (n + 1.0) / ((n - 1.0) * (n - 2.0) * (n - 3.0)) * sum
                            - 3.0 * (n - 1.0).powi(2) / ((n - 2.0) * (n - 3.0))
                    }
                }
            }
            Self::Skewness => {
                if values.len() < 3 {
                    f64::NAN
                } else {
                    let variance = sample_variance(values);
                    if variance == 0.0 {
                        0.0
                    } else {
                        let sum: f64 = standardized(values, variance).map(|z| z.powi(3)).sum();
                        n / ((n - 1.0) * (n - 2.0)) * sum
                    }
                }
            }
        };
        Some(value)
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn central_moment(values: &[f64], power: i32) -> f64 {
    let mean = mean(values);
    values.iter().map(|v| (v - mean).powi(power)).sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

fn standardized(values: &[f64], variance: f64) -> impl Iterator<Item = f64> + '_ {
    let mean = mean(values);
    let std = variance.sqrt();
    values.iter().map(move |v| (v - mean) / std)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_simple_statistics() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(Statistic::FirstSample.compute(&values), Some(2.0));
        assert_eq!(Statistic::LastFill.compute(&values), Some(9.0));
        assert_eq!(Statistic::Mean.compute(&values), Some(5.0));
        assert_eq!(Statistic::Min.compute(&values), Some(2.0));
        assert_eq!(Statistic::Max.compute(&values), Some(9.0));
        assert_eq!(Statistic::Median.compute(&values), Some(4.5));
        assert_eq!(Statistic::Count.compute(&values), Some(8.0));
        assert_eq!(Statistic::PopVariance.compute(&values), Some(4.0));
        assert!(close(Statistic::Variance.compute(&values).unwrap(), 32.0 / 7.0));
        assert!(close(
            Statistic::Jitter.compute(&values).unwrap(),
            (32.0f64 / 7.0).sqrt() / 5.0
        ));
        assert_eq!(Statistic::Mean.compute(&[]), None);
    }

    #[test]
    fn test_higher_moments() {
        assert!(Statistic::Skewness.compute(&[1.0, 2.0]).unwrap().is_nan());
        assert!(Statistic::Kurtosis.compute(&[1.0, 2.0, 3.0]).unwrap().is_nan());
        assert_eq!(Statistic::Skewness.compute(&[3.0, 3.0, 3.0]), Some(0.0));
        assert!(close(Statistic::Skewness.compute(&[1.0, 2.0, 3.0]).unwrap(), 0.0));
        assert!(Statistic::Skewness.compute(&[1.0, 1.0, 1.0, 10.0]).unwrap() > 0.0);
        // Sample excess kurtosis of 1..=5 is -1.2.
        assert!(close(
            Statistic::Kurtosis.compute(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap(),
            -1.2
        ));
    }

    #[test]
    fn test_identity_roundtrip() {
        for identity in ["firstSample", "mean", "popvariance", "skewness", "lastFill"] {
            assert_eq!(Statistic::from_identity(identity).unwrap().identity(), identity);
        }
        assert!(Statistic::from_identity("nth").is_none());
    }
}
