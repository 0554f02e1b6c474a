use crate::errors::BoostError;

type MetricFn = fn(&[f64], &[f64]) -> Result<f64, BoostError>;

/// Look up an evaluation metric by name.
pub fn metric_by_name(name: &str) -> Result<MetricFn, BoostError> {
    match name {
        "rmse" => Ok(rmse),
        "error" => Ok(classification_error),
        "logloss" => Ok(log_loss),
        "auc" => Ok(auc),
        _ => Err(BoostError::UnknownName {
            kind: "metric",
            name: name.to_string(),
        }),
    }
}

pub fn rmse(y: &[f64], yhat: &[f64]) -> Result<f64, BoostError> {
    let sum: f64 = y
        .iter()
        .zip(yhat)
        .map(|(y_, p)| (y_ - p) * (y_ - p))
        .sum();
    Ok((sum / y.len() as f64).sqrt())
}

/// Fraction of instances on the wrong side of the 0.5 threshold.
pub fn classification_error(y: &[f64], yhat: &[f64]) -> Result<f64, BoostError> {
    let wrong = y
        .iter()
        .zip(yhat)
        .filter(|(y_, p)| (**p > 0.5) != (**y_ > 0.5))
        .count();
    Ok(wrong as f64 / y.len() as f64)
}

/// Negative log likelihood over predicted probabilities, clamped away
/// from 0 and 1.
pub fn log_loss(y: &[f64], yhat: &[f64]) -> Result<f64, BoostError> {
    const EPS: f64 = 1e-16;
    let sum: f64 = y
        .iter()
        .zip(yhat)
        .map(|(y_, p)| {
            let p = p.clamp(EPS, 1.0 - EPS);
            -(y_ * p.ln() + (1.0 - y_) * (1.0 - p).ln())
        })
        .sum();
    Ok(sum / y.len() as f64)
}

/// Area under the ROC curve by the rank-sum identity, with tied
/// predictions given their average rank. A single-class label vector
/// has no ordering to score.
pub fn auc(y: &[f64], yhat: &[f64]) -> Result<f64, BoostError> {
    let mut order: Vec<usize> = (0..y.len()).collect();
    order.sort_by(|&a, &b| yhat[a].total_cmp(&yhat[b]));
    let mut pos_rank_sum = 0.0;
    let mut npos = 0usize;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j < order.len() && yhat[order[j]] == yhat[order[i]] {
            j += 1;
        }
        // ranks are 1-based; ties share the group's average rank
        let avg_rank = (i + 1 + j) as f64 / 2.0;
        for &idx in &order[i..j] {
            if y[idx] > 0.5 {
                pos_rank_sum += avg_rank;
                npos += 1;
            }
        }
        i = j;
    }
    let nneg = y.len() - npos;
    if npos == 0 || nneg == 0 {
        return Err(BoostError::DegenerateData(
            "auc needs both positive and negative labels".to_string(),
        ));
    }
    let npos = npos as f64;
    Ok((pos_rank_sum - npos * (npos + 1.0) / 2.0) / (npos * nneg as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rmse() {
        let v = rmse(&[0.0, 0.0, 3.0], &[0.0, 0.0, 0.0]).unwrap();
        assert!((v - (3.0 / 3f64.sqrt())).abs() < 1e-12);
        assert_eq!(rmse(&[1.0, 2.0], &[1.0, 2.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_classification_error() {
        let v = classification_error(&[1.0, 0.0, 1.0, 0.0], &[0.9, 0.2, 0.4, 0.6]).unwrap();
        assert_eq!(v, 0.5);
    }

    #[test]
    fn test_log_loss_handles_saturated_predictions() {
        let v = log_loss(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!(v >= 0.0 && v < 1e-10);
        assert!(log_loss(&[1.0], &[0.0]).unwrap().is_finite());
    }

    #[test]
    fn test_auc() {
        // Perfectly ordered, inverted, and tied-in-the-middle cases.
        assert_eq!(auc(&[0.0, 0.0, 1.0, 1.0], &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(auc(&[1.0, 1.0, 0.0, 0.0], &[0.1, 0.2, 0.8, 0.9]).unwrap(), 0.0);
        let v = auc(&[0.0, 1.0, 0.0, 1.0], &[0.1, 0.5, 0.5, 0.9]).unwrap();
        assert!((v - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class_is_degenerate() {
        assert!(matches!(
            auc(&[1.0, 1.0], &[0.3, 0.7]),
            Err(BoostError::DegenerateData(_))
        ));
        assert!(matches!(
            auc(&[0.0, 0.0], &[0.3, 0.7]),
            Err(BoostError::DegenerateData(_))
        ));
    }

    #[test]
    fn test_metric_registry() {
        assert!(metric_by_name("rmse").is_ok());
        assert!(metric_by_name("auc").is_ok());
        assert!(matches!(
            metric_by_name("ndcg"),
            Err(BoostError::UnknownName { .. })
        ));
    }
}
