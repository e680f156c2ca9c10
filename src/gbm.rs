use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{PipelineError, Result};

const MIN_SAMPLES_SPLIT: usize = 2;
const MIN_SAMPLES_LEAF: usize = 1;
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct GbmParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: Option<usize>,
    pub subsample: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    residuals: &'a [f64],
    max_depth: Option<usize>,
    rng: &'a mut StdRng,
    gains: &'a mut [f64],
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let value = rows.iter().map(|&i| self.residuals[i]).sum::<f64>() / rows.len() as f64;
        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        let depth_ok = self.max_depth.is_none_or(|max| depth < max);
        if !depth_ok || rows.len() < MIN_SAMPLES_SPLIT {
            return node_idx;
        }
        let Some(split) = self.best_split(&rows) else {
            return node_idx;
        };
        self.gains[split.feature] += split.gain;
        let left = self.grow(split.left, depth + 1);
        let right = self.grow(split.right, depth + 1);
        self.nodes[node_idx] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_idx
    }

    /// Exhaustive threshold search maximizing squared-error reduction.
    /// Features are visited in a seeded random order; the first best wins.
    fn best_split(&mut self, rows: &[usize]) -> Option<BestSplit> {
        let n_features = self.gains.len();
        let mut order: Vec<usize> = (0..n_features).collect();
        order.shuffle(&mut *self.rng);

        let n = rows.len() as f64;
        let total: f64 = rows.iter().map(|&i| self.residuals[i]).sum();
        let parent = total * total / n;

        let mut best: Option<(usize, f64, f64, usize, Vec<usize>)> = None;
        for feature in order {
            let mut sorted = rows.to_vec();
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));
            let mut left_sum = 0.0;
            for k in 1..sorted.len() {
                left_sum += self.residuals[sorted[k - 1]];
                let lo = self.x[sorted[k - 1]][feature];
                let hi = self.x[sorted[k]][feature];
                if lo == hi || k < MIN_SAMPLES_LEAF || sorted.len() - k < MIN_SAMPLES_LEAF {
                    continue;
                }
                let nl = k as f64;
                let nr = n - nl;
                let right_sum = total - left_sum;
                let gain = left_sum * left_sum / nl + right_sum * right_sum / nr - parent;
                if gain > MIN_GAIN && best.as_ref().is_none_or(|b| gain > b.2) {
                    best = Some((feature, (lo + hi) / 2.0, gain, k, sorted.clone()));
                }
            }
        }

        best.map(|(feature, threshold, gain, k, mut sorted)| {
            let right = sorted.split_off(k);
            BestSplit {
                feature,
                threshold,
                gain,
                left: sorted,
                right,
            }
        })
    }
}

/// Squared-loss gradient boosting over CART regression trees.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostingRegressor {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl GradientBoostingRegressor {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &GbmParams) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(PipelineError::ModelTraining(format!(
                "cannot fit on {} rows with {} targets",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|row| row.len() != n_features) {
            return Err(PipelineError::ModelTraining(
                "rows must share a non-zero width".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let init = y.iter().sum::<f64>() / y.len() as f64;
        let mut current = vec![init; y.len()];
        let mut gains = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let sample_size = ((params.subsample * y.len() as f64).round() as usize).clamp(1, y.len());

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, p)| t - p).collect();
            let mut rows: Vec<usize> = (0..y.len()).collect();
            if sample_size < rows.len() {
                rows.shuffle(&mut rng);
                rows.truncate(sample_size);
                rows.sort_unstable();
            }
            let mut builder = TreeBuilder {
                x,
                residuals: &residuals,
                max_depth: params.max_depth,
                rng: &mut rng,
                gains: &mut gains,
                nodes: Vec::new(),
            };
            builder.grow(rows, 0);
            let tree = RegressionTree {
                nodes: builder.nodes,
            };
            for (pred, row) in current.iter_mut().zip(x) {
                *pred += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        let total_gain: f64 = gains.iter().sum();
        let importances = if total_gain > 0.0 {
            gains.iter().map(|g| g / total_gain).collect()
        } else {
            vec![0.0; n_features]
        };

        Ok(Self {
            init,
            learning_rate: params.learning_rate,
            trees,
            importances,
        })
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.init, |acc, tree| acc + self.learning_rate * tree.predict(row))
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Split gains per feature, normalized to sum to 1 (all zero when no tree split).
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}
