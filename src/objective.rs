use crate::data::GradPair;
use crate::errors::BoostError;

/// Loss functions supply the per instance gradient pairs for a boosting
/// round from labels and the current raw margins. The hessian of an
/// excluded instance is negative; none of these losses produce one, so
/// exclusion stays a caller-side decision.
pub trait ObjectiveFunction {
    fn gradients(y: &[f64], margin: &[f64]) -> Vec<GradPair>;

    /// Map a raw margin to the output scale. Identity unless the loss
    /// says otherwise.
    fn transform(margin: f64) -> f64 {
        margin
    }

    fn default_metric() -> &'static str;
}

/// Squared error regression. Constant unit hessian, so every instance
/// weighs the same in the split statistics.
#[derive(Debug, Clone, Copy)]
pub struct SquaredLoss {}

impl ObjectiveFunction for SquaredLoss {
    fn gradients(y: &[f64], margin: &[f64]) -> Vec<GradPair> {
        y.iter()
            .zip(margin)
            .map(|(y_, m)| GradPair::new((m - y_) as f32, 1.0))
            .collect()
    }

    fn default_metric() -> &'static str {
        "rmse"
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Binary logistic loss over raw margins; predictions are transformed
/// to probabilities.
#[derive(Debug, Clone, Copy)]
pub struct LogLoss {}

impl ObjectiveFunction for LogLoss {
    fn gradients(y: &[f64], margin: &[f64]) -> Vec<GradPair> {
        y.iter()
            .zip(margin)
            .map(|(y_, m)| {
                let p = sigmoid(*m);
                // hessian floor keeps saturated instances scorable
                GradPair::new((p - y_) as f32, ((p * (1.0 - p)).max(1e-16)) as f32)
            })
            .collect()
    }

    fn transform(margin: f64) -> f64 {
        sigmoid(margin)
    }

    fn default_metric() -> &'static str {
        "logloss"
    }
}

/// Name-based dispatch for configuration driven setups.
pub fn gradients_by_name(
    name: &str,
    y: &[f64],
    margin: &[f64],
) -> Result<Vec<GradPair>, BoostError> {
    match name {
        "reg:linear" | "reg:squarederror" => Ok(SquaredLoss::gradients(y, margin)),
        "binary:logistic" => Ok(LogLoss::gradients(y, margin)),
        _ => Err(BoostError::UnknownName {
            kind: "objective",
            name: name.to_string(),
        }),
    }
}
