//! Random forest regression: bagged CART trees with a squared-error criterion.
//!
//! Trees are stored as flat node arrays (root at index 0) and serialized with
//! the forest. Fitting is deterministic for a fixed seed: per-tree seeds are
//! drawn from the master seed before trees are grown in parallel.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ForestError {
    #[error("cannot fit a forest on an empty dataset")]
    EmptyDataset,
    #[error("feature matrix has {rows} rows but {targets} targets were given")]
    TargetMismatch { rows: usize, targets: usize },
    #[error("feature count mismatch: model expects {expected}, got {actual}")]
    FeatureCountMismatch { expected: usize, actual: usize },
    #[error("invalid forest parameter: {0}")]
    InvalidParams(&'static str),
    #[error("forest has no trees")]
    NoTrees,
    #[error("tree {tree} is malformed at node {node}: {reason}")]
    MalformedTree {
        tree: usize,
        node: usize,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` means all of them.
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn validate(&self) -> Result<(), ForestError> {
        if self.n_estimators == 0 {
            return Err(ForestError::InvalidParams("n_estimators must be at least 1"));
        }
        if self.min_samples_split < 2 {
            return Err(ForestError::InvalidParams("min_samples_split must be at least 2"));
        }
        if self.min_samples_leaf == 0 {
            return Err(ForestError::InvalidParams("min_samples_leaf must be at least 1"));
        }
        if self.max_features == Some(0) {
            return Err(ForestError::InvalidParams("max_features must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: u32,
        right: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: u32) -> usize {
            match &nodes[id as usize] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut id = 0usize;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    };
                }
            }
        }
    }

    /// Children always follow their parent, which also rules out cycles.
    fn check(&self, n_features: usize) -> Result<(), (usize, &'static str)> {
        if self.nodes.is_empty() {
            return Err((0, "tree has no nodes"));
        }
        for (id, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err((id, "leaf value is not finite"))
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if feature >= n_features {
                        return Err((id, "split feature out of range"));
                    }
                    for child in [left as usize, right as usize] {
                        if child <= id || child >= self.nodes.len() {
                            return Err((id, "child index out of range"));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn fit<'a>(
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
        params: &ForestParams,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n_rows = x.nrows();
        let mut samples: Vec<usize> = if params.bootstrap {
            (0..n_rows).map(|_| rng.random_range(0..n_rows)).collect()
        } else {
            (0..n_rows).collect()
        };

        let mut builder = TreeBuilder {
            x,
            y,
            params,
            rng,
            nodes: Vec::new(),
        };
        builder.grow(&mut samples, 0);
        Self {
            nodes: builder.nodes,
        }
    }
}

struct Candidate {
    feature: usize,
    threshold: f64,
    score: f64,
}

struct TreeBuilder<'a, 'p> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    params: &'p ForestParams,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_, '_> {
    fn grow(&mut self, samples: &mut [usize], depth: usize) -> u32 {
        let id = self.nodes.len() as u32;
        let n = samples.len();
        let sum: f64 = samples.iter().map(|&i| self.y[i]).sum();
        self.nodes.push(Node::Leaf {
            value: sum / n as f64,
        });

        let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
        if depth_reached || n < self.params.min_samples_split || self.is_pure(samples) {
            return id;
        }

        let Some(split) = self.best_split(samples) else {
            return id;
        };

        let (mut left, mut right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&i| self.x[[i, split.feature]] <= split.threshold);
        let left_id = self.grow(&mut left, depth + 1);
        let right_id = self.grow(&mut right, depth + 1);

        self.nodes[id as usize] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_id,
            right: right_id,
        };
        id
    }

    fn is_pure(&self, samples: &[usize]) -> bool {
        let first = self.y[samples[0]];
        samples.iter().all(|&i| self.y[i] == first)
    }

    /// Maximises `sum_l^2 / n_l + sum_r^2 / n_r`, which is equivalent to
    /// minimising the children's summed squared error.
    fn best_split(&mut self, samples: &[usize]) -> Option<Candidate> {
        let n_features = self.x.ncols();
        let features: Vec<usize> = match self.params.max_features {
            Some(k) if k < n_features => index::sample(&mut self.rng, n_features, k).into_vec(),
            _ => (0..n_features).collect(),
        };

        let min_leaf = self.params.min_samples_leaf;
        let total: f64 = samples.iter().map(|&i| self.y[i]).sum();
        let n = samples.len();
        let mut best: Option<Candidate> = None;
        let mut sorted: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in features {
            sorted.clear();
            sorted.extend(samples.iter().map(|&i| (self.x[[i, feature]], self.y[i])));
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            for k in 0..n - 1 {
                left_sum += sorted[k].1;
                let (current, next) = (sorted[k].0, sorted[k + 1].0);
                if current == next {
                    continue;
                }
                let n_left = k + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }

                let right_sum = total - left_sum;
                let score =
                    left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64;
                if best.as_ref().is_none_or(|b| score > b.score) {
                    let mut threshold = current + (next - current) / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(Candidate {
                        feature,
                        threshold,
                        score,
                    });
                }
            }
        }

        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    params: ForestParams,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn fit<'a>(
        params: ForestParams,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, f64>,
    ) -> Result<Self, ForestError> {
        params.validate()?;
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(ForestError::EmptyDataset);
        }
        if x.nrows() != y.len() {
            return Err(ForestError::TargetMismatch {
                rows: x.nrows(),
                targets: y.len(),
            });
        }

        let mut master = StdRng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_estimators).map(|_| master.random()).collect();
        let trees = seeds
            .into_par_iter()
            .map(|seed| RegressionTree::fit(x, y, &params, seed))
            .collect();

        Ok(Self {
            n_features: x.ncols(),
            params,
            trees,
        })
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Structural check for forests that were not produced by [`fit`](Self::fit),
    /// such as ones read back from disk.
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.trees.is_empty() {
            return Err(ForestError::NoTrees);
        }
        for (tree, t) in self.trees.iter().enumerate() {
            t.check(self.n_features)
                .map_err(|(node, reason)| ForestError::MalformedTree { tree, node, reason })?;
        }
        Ok(())
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> Result<f64, ForestError> {
        if row.len() != self.n_features {
            return Err(ForestError::FeatureCountMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        Ok(total / self.trees.len() as f64)
    }

    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Vec<f64>, ForestError> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { 7.0 });
        let y = Array1::from_shape_fn(40, |i| if i < 20 { 10.0 } else { 50.0 });
        (x, y)
    }

    #[test]
    fn single_tree_without_bootstrap_learns_a_step() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_estimators: 1,
            bootstrap: false,
            ..ForestParams::default()
        };
        let forest = RandomForestRegressor::fit(params, x.view(), y.view()).unwrap();
        let tree = &forest.trees()[0];

        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.depth(), 1);
        assert_eq!(forest.predict_row(array![3.0, 7.0].view()).unwrap(), 10.0);
        assert_eq!(forest.predict_row(array![30.0, 7.0].view()).unwrap(), 50.0);
        // Threshold sits halfway between 19 and 20.
        assert_eq!(forest.predict_row(array![19.4, 7.0].view()).unwrap(), 10.0);
        assert_eq!(forest.predict_row(array![19.6, 7.0].view()).unwrap(), 50.0);
    }

    #[test]
    fn fitting_is_deterministic_for_a_seed() {
        let (x, y) = step_data();
        let params = ForestParams {
            n_estimators: 12,
            max_features: Some(1),
            ..ForestParams::default()
        };
        let a = RandomForestRegressor::fit(params.clone(), x.view(), y.view()).unwrap();
        let b = RandomForestRegressor::fit(params.clone(), x.view(), y.view()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.params(), &params);
        assert_eq!(a.n_trees(), 12);
    }

    #[test]
    fn predictions_stay_within_target_range() {
        let x = Array2::from_shape_fn((60, 3), |(i, j)| (i * (j + 1)) as f64);
        let y = Array1::from_shape_fn(60, |i| (i as f64).sqrt());
        let forest = RandomForestRegressor::fit(ForestParams::default(), x.view(), y.view()).unwrap();

        for p in forest.predict(x.view()).unwrap() {
            assert!((0.0..=59f64.sqrt()).contains(&p));
        }
    }

    #[test]
    fn max_depth_caps_tree_depth() {
        let x = Array2::from_shape_fn((64, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(64, |i| i as f64);
        let params = ForestParams {
            n_estimators: 4,
            max_depth: Some(2),
            ..ForestParams::default()
        };
        let forest = RandomForestRegressor::fit(params, x.view(), y.view()).unwrap();
        assert!(forest.trees().iter().all(|t| t.depth() <= 2));
    }

    #[test]
    fn constant_target_produces_single_leaf() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| (i + j) as f64);
        let y = Array1::from_elem(10, 4.5);
        let forest = RandomForestRegressor::fit(ForestParams::default(), x.view(), y.view()).unwrap();
        assert!(forest.trees().iter().all(|t| t.n_nodes() == 1));
        assert_eq!(forest.predict_row(array![100.0, -3.0].view()).unwrap(), 4.5);
    }

    #[test]
    fn rejects_bad_shapes_and_params() {
        let (x, y) = step_data();
        let err = RandomForestRegressor::fit(
            ForestParams::default(),
            x.view(),
            y.slice(ndarray::s![..10]),
        )
        .unwrap_err();
        assert_eq!(err, ForestError::TargetMismatch { rows: 40, targets: 10 });

        let empty = Array2::<f64>::zeros((0, 2));
        assert_eq!(
            RandomForestRegressor::fit(ForestParams::default(), empty.view(), Array1::zeros(0).view())
                .unwrap_err(),
            ForestError::EmptyDataset
        );

        let params = ForestParams {
            n_estimators: 0,
            ..ForestParams::default()
        };
        assert!(matches!(
            RandomForestRegressor::fit(params, x.view(), y.view()),
            Err(ForestError::InvalidParams(_))
        ));

        let forest = RandomForestRegressor::fit(ForestParams::default(), x.view(), y.view()).unwrap();
        assert_eq!(
            forest.predict_row(array![1.0, 2.0, 3.0].view()).unwrap_err(),
            ForestError::FeatureCountMismatch { expected: 2, actual: 3 }
        );
    }

    #[test]
    fn fitted_forest_passes_validation() {
        let (x, y) = step_data();
        let forest = RandomForestRegressor::fit(ForestParams::default(), x.view(), y.view()).unwrap();
        assert_eq!(forest.validate(), Ok(()));
    }

    #[test]
    fn malformed_trees_fail_validation() {
        let split = |feature, left, right| Node::Split {
            feature,
            threshold: 0.5,
            left,
            right,
        };
        let leaf = Node::Leaf { value: 1.0 };
        let forest = |nodes: Vec<Node>| RandomForestRegressor {
            params: ForestParams::default(),
            n_features: 2,
            trees: vec![RegressionTree { nodes }],
        };

        let empty = RandomForestRegressor {
            params: ForestParams::default(),
            n_features: 2,
            trees: Vec::new(),
        };
        assert_eq!(empty.validate(), Err(ForestError::NoTrees));

        let cases = [
            vec![],
            vec![split(0, 1, 7), leaf.clone()],
            vec![split(0, 0, 1), leaf.clone()],
            vec![split(5, 1, 2), leaf.clone(), leaf.clone()],
            vec![Node::Leaf { value: f64::NAN }],
        ];
        for nodes in cases {
            assert!(matches!(
                forest(nodes).validate(),
                Err(ForestError::MalformedTree { tree: 0, node: 0, .. })
            ));
        }
        assert_eq!(forest(vec![split(1, 1, 2), leaf.clone(), leaf]).validate(), Ok(()));
    }
}
