//! Gradient-boosted regression trees with squared-error loss.
//!
//! Each round fits a depth-limited CART tree to the current residuals and adds
//! it to the ensemble scaled by the learning rate. Split search is exhaustive
//! over midpoints between distinct sorted feature values; ties keep the first
//! candidate found (lowest feature index, then lowest threshold), so fitting
//! is fully deterministic.

use serde::{Deserialize, Serialize};

use super::NUM_FEATURES;

/// Ensemble hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// A node with fewer samples becomes a leaf.
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

/// Minimum impurity decrease for a split to be kept.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        /// Reduction in squared error achieved by this split.
        gain: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, x: &[f64; NUM_FEATURES]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn accumulate_gain(&self, totals: &mut [f64; NUM_FEATURES]) {
        if let Node::Split {
            feature,
            gain,
            left,
            right,
            ..
        } = self
        {
            totals[*feature] += gain;
            left.accumulate_gain(totals);
            right.accumulate_gain(totals);
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// A single CART regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    pub fn fit(x: &[[f64; NUM_FEATURES]], y: &[f64], params: &BoostingParams) -> Self {
        let indices: Vec<usize> = (0..x.len().min(y.len())).collect();
        Self {
            root: build_node(x, y, indices, 0, params),
        }
    }

    pub fn predict(&self, x: &[f64; NUM_FEATURES]) -> f64 {
        self.root.predict(x)
    }
}

fn mean_of(y: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn build_node(
    x: &[[f64; NUM_FEATURES]],
    y: &[f64],
    indices: Vec<usize>,
    depth: usize,
    params: &BoostingParams,
) -> Node {
    let value = mean_of(y, &indices);
    if depth >= params.max_depth || indices.len() < params.min_samples_split.max(2) {
        return Node::Leaf { value };
    }

    let Some(best) = find_best_split(x, y, &indices, params.min_samples_leaf.max(1)) else {
        return Node::Leaf { value };
    };

    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .into_iter()
        .partition(|&i| x[i][best.feature] <= best.threshold);
    if left.is_empty() || right.is_empty() {
        return Node::Leaf { value };
    }

    Node::Split {
        feature: best.feature,
        threshold: best.threshold,
        gain: best.gain,
        left: Box::new(build_node(x, y, left, depth + 1, params)),
        right: Box::new(build_node(x, y, right, depth + 1, params)),
    }
}

/// Exhaustive search for the split maximising the squared-error reduction.
///
/// For a partition into L and R the reduction equals
/// `sum_L²/n_L + sum_R²/n_R − sum²/n`, so only prefix sums are needed.
fn find_best_split(
    x: &[[f64; NUM_FEATURES]],
    y: &[f64],
    indices: &[usize],
    min_leaf: usize,
) -> Option<BestSplit> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let parent_score = total * total / n as f64;

    let mut best: Option<BestSplit> = None;
    let mut sorted = indices.to_vec();

    for feature in 0..NUM_FEATURES {
        sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += y[sorted[k - 1]];
            let lo = x[sorted[k - 1]][feature];
            let hi = x[sorted[k]][feature];
            if lo == hi || k < min_leaf || n - k < min_leaf {
                continue;
            }
            let right_sum = total - left_sum;
            let score =
                left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
            let gain = score - parent_score;
            if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit {
                    feature,
                    threshold: lo + (hi - lo) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}

/// Boosted ensemble of regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: BoostingParams,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    /// Fit the ensemble. An empty training set yields a constant-zero model.
    pub fn fit(x: &[[f64; NUM_FEATURES]], y: &[f64], params: BoostingParams) -> Self {
        let n = x.len().min(y.len());
        let base_score = if n == 0 {
            0.0
        } else {
            y[..n].iter().sum::<f64>() / n as f64
        };

        let mut predictions = vec![base_score; n];
        let mut residuals = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            if n == 0 {
                break;
            }
            for i in 0..n {
                residuals[i] = y[i] - predictions[i];
            }
            let tree = RegressionTree::fit(&x[..n], &residuals, &params);
            for i in 0..n {
                predictions[i] += params.learning_rate * tree.predict(&x[i]);
            }
            trees.push(tree);
        }

        Self {
            params,
            base_score,
            trees,
        }
    }

    pub fn predict(&self, x: &[f64; NUM_FEATURES]) -> f64 {
        self.base_score
            + self
                .trees
                .iter()
                .map(|t| self.params.learning_rate * t.predict(x))
                .sum::<f64>()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Total split gain per feature, normalised to sum to 1 (all zeros when
    /// no split was made).
    pub fn feature_importances(&self) -> [f64; NUM_FEATURES] {
        let mut totals = [0.0; NUM_FEATURES];
        for tree in &self.trees {
            tree.root.accumulate_gain(&mut totals);
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            for v in totals.iter_mut() {
                *v /= sum;
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(h: f64) -> [f64; NUM_FEATURES] {
        [h, 0.0, 15.0, 10.0, 0.0]
    }

    #[test]
    fn test_tree_learns_step_function() {
        let x: Vec<_> = (0..24).map(|h| row(h as f64)).collect();
        let y: Vec<f64> = (0..24).map(|h| if h < 12 { 5.0 } else { 20.0 }).collect();
        let tree = RegressionTree::fit(&x, &y, &BoostingParams::default());
        assert_eq!(tree.predict(&row(3.0)), 5.0);
        assert_eq!(tree.predict(&row(18.0)), 20.0);
        // Threshold sits between 11 and 12.
        assert_eq!(tree.predict(&row(11.4)), 5.0);
        assert_eq!(tree.predict(&row(11.6)), 20.0);
    }

    #[test]
    fn test_constant_target_is_a_single_leaf() {
        let x: Vec<_> = (0..10).map(|h| row(h as f64)).collect();
        let y = vec![7.0; 10];
        let tree = RegressionTree::fit(&x, &y, &BoostingParams::default());
        assert_eq!(tree.root, Node::Leaf { value: 7.0 });
    }

    #[test]
    fn test_max_depth_zero_is_mean() {
        let x: Vec<_> = (0..4).map(|h| row(h as f64)).collect();
        let y = vec![1.0, 2.0, 3.0, 6.0];
        let params = BoostingParams {
            max_depth: 0,
            ..BoostingParams::default()
        };
        let tree = RegressionTree::fit(&x, &y, &params);
        assert_eq!(tree.predict(&row(0.0)), 3.0);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x: Vec<_> = (0..4).map(|h| row(h as f64)).collect();
        let y = vec![0.0, 0.0, 0.0, 100.0];
        let params = BoostingParams {
            max_depth: 1,
            min_samples_leaf: 2,
            ..BoostingParams::default()
        };
        let tree = RegressionTree::fit(&x, &y, &params);
        // The only admissible split is 2/2.
        assert_eq!(tree.predict(&row(0.0)), 0.0);
        assert_eq!(tree.predict(&row(3.0)), 50.0);
    }

    #[test]
    fn test_boosting_reduces_training_error() {
        let x: Vec<_> = (0..48).map(|i| row((i % 24) as f64)).collect();
        let y: Vec<f64> = (0..48)
            .map(|i| 10.0 + ((i % 24) as f64 / 3.0).sin() * 5.0)
            .collect();
        let model = GradientBoostedTrees::fit(&x, &y, BoostingParams::default());
        assert_eq!(model.n_trees(), 100);
        let mse: f64 = x
            .iter()
            .zip(&y)
            .map(|(xi, yi)| (model.predict(xi) - yi).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 0.1, "training mse too high: {}", mse);
    }

    #[test]
    fn test_fit_is_deterministic_and_serializable() {
        let x: Vec<_> = (0..30)
            .map(|i| [(i % 24) as f64, (i % 7) as f64, i as f64 * 0.5, 3.0, (i % 3) as f64])
            .collect();
        let y: Vec<f64> = (0..30).map(|i| (i * 13 % 11) as f64).collect();
        let a = GradientBoostedTrees::fit(&x, &y, BoostingParams::default());
        let b = GradientBoostedTrees::fit(&x, &y, BoostingParams::default());
        assert_eq!(a, b);

        let json = serde_json::to_string(&a).unwrap();
        let back: GradientBoostedTrees = serde_json::from_str(&json).unwrap();
        for xi in &x {
            assert!((a.predict(xi) - back.predict(xi)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_feature_importance_points_at_informative_feature() {
        let x: Vec<_> = (0..40)
            .map(|i| [(i % 24) as f64, 0.0, 15.0, 10.0, if i % 2 == 0 { 0.0 } else { 61.0 }])
            .collect();
        let y: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 20.0 } else { 5.0 }).collect();
        let model = GradientBoostedTrees::fit(&x, &y, BoostingParams::default());
        let imp = model.feature_importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[4] > 0.9, "weather_code importance {:?}", imp);
    }

    #[test]
    fn test_empty_fit_predicts_zero() {
        let model = GradientBoostedTrees::fit(&[], &[], BoostingParams::default());
        assert_eq!(model.n_trees(), 0);
        assert_eq!(model.predict(&row(1.0)), 0.0);
        assert_eq!(model.feature_importances(), [0.0; NUM_FEATURES]);
    }
}
