//! Weighted CART used by the forest (gini, class distributions in leaves) and
//! by boosting (squared error, mean residual in leaves).

use ndarray::{Array2, ArrayView1};
use rand::seq::index;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn per split; all when `None`
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// What the tree is fit against
#[derive(Clone, Copy)]
pub enum Target<'a> {
    Classes { labels: &'a [usize], n_classes: usize },
    Values(&'a [f64]),
}

#[derive(Clone)]
struct NodeStats {
    weight: f64,
    count: usize,
    class_weight: Vec<f64>,
    sum: f64,
    sum_sq: f64,
}

impl NodeStats {
    fn empty(target: Target) -> Self {
        let n_classes = match target {
            Target::Classes { n_classes, .. } => n_classes,
            Target::Values(_) => 0,
        };
        Self {
            weight: 0.0,
            count: 0,
            class_weight: vec![0.0; n_classes],
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    fn add(&mut self, target: Target, i: usize, w: f64) {
        self.weight += w;
        self.count += 1;
        match target {
            Target::Classes { labels, .. } => self.class_weight[labels[i]] += w,
            Target::Values(values) => {
                self.sum += w * values[i];
                self.sum_sq += w * values[i] * values[i];
            }
        }
    }

    fn minus(&self, other: &NodeStats) -> NodeStats {
        NodeStats {
            weight: self.weight - other.weight,
            count: self.count - other.count,
            class_weight: self
                .class_weight
                .iter()
                .zip(&other.class_weight)
                .map(|(a, b)| a - b)
                .collect(),
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }

    /// Weighted gini times node weight, or weighted sum of squared errors
    fn cost(&self, target: Target) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        match target {
            Target::Classes { .. } => {
                let sq: f64 = self.class_weight.iter().map(|c| c * c).sum();
                (self.weight - sq / self.weight).max(0.0)
            }
            Target::Values(_) => (self.sum_sq - self.sum * self.sum / self.weight).max(0.0),
        }
    }

    fn leaf_value(&self, target: Target) -> Vec<f64> {
        match target {
            Target::Classes { n_classes, .. } => {
                if self.weight <= 0.0 {
                    vec![1.0 / n_classes as f64; n_classes]
                } else {
                    self.class_weight.iter().map(|c| c / self.weight).collect()
                }
            }
            Target::Values(_) => {
                vec![if self.weight > 0.0 { self.sum / self.weight } else { 0.0 }]
            }
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    params: TreeParams,
    root: Option<Node>,
    importances: Vec<f64>,
}

impl DecisionTree {
    pub fn new(params: TreeParams) -> Self {
        Self {
            params,
            root: None,
            importances: Vec::new(),
        }
    }

    /// Grow the tree on `indices` (repeats allowed, as in a bootstrap draw)
    pub fn fit(
        &mut self,
        x: &Array2<f64>,
        target: Target,
        weights: &[f64],
        indices: &[usize],
        rng: &mut ChaCha8Rng,
    ) {
        self.importances = vec![0.0; x.ncols()];
        let root = self.grow(x, target, weights, indices, 0, rng);
        self.root = Some(root);

        let total: f64 = self.importances.iter().sum();
        if total > 0.0 {
            self.importances.iter_mut().for_each(|v| *v /= total);
        }
    }

    fn grow(
        &mut self,
        x: &Array2<f64>,
        target: Target,
        weights: &[f64],
        indices: &[usize],
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> Node {
        let mut stats = NodeStats::empty(target);
        for &i in indices {
            stats.add(target, i, weights[i]);
        }
        let cost = stats.cost(target);

        if depth >= self.params.max_depth
            || indices.len() < self.params.min_samples_split.max(2)
            || cost < 1e-12
        {
            return Node::Leaf { value: stats.leaf_value(target) };
        }

        let Some(best) = self.best_split(x, target, weights, indices, &stats, rng) else {
            return Node::Leaf { value: stats.leaf_value(target) };
        };

        self.importances[best.feature] += cost - best.cost;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, best.feature]] <= best.threshold);

        let left = self.grow(x, target, weights, &left_idx, depth + 1, rng);
        let right = self.grow(x, target, weights, &right_idx, depth + 1, rng);
        Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn best_split(
        &self,
        x: &Array2<f64>,
        target: Target,
        weights: &[f64],
        indices: &[usize],
        parent: &NodeStats,
        rng: &mut ChaCha8Rng,
    ) -> Option<BestSplit> {
        let n_features = x.ncols();
        let k = self.params.max_features.unwrap_or(n_features).clamp(1, n_features);
        let features = index::sample(rng, n_features, k);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent_cost = parent.cost(target);

        let mut best: Option<BestSplit> = None;
        let mut order = indices.to_vec();

        for feature in features.iter() {
            order.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

            let mut left = NodeStats::empty(target);
            for pos in 0..order.len() - 1 {
                let i = order[pos];
                left.add(target, i, weights[i]);

                let here = x[[i, feature]];
                let next = x[[order[pos + 1], feature]];
                if here == next {
                    continue;
                }
                if left.count < min_leaf || order.len() - left.count < min_leaf {
                    continue;
                }

                let right = parent.minus(&left);
                let cost = left.cost(target) + right.cost(target);
                if cost < parent_cost - 1e-12 && best.as_ref().map_or(true, |b| cost < b.cost) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (here + next) / 2.0,
                        cost,
                    });
                }
            }
        }
        best
    }

    pub fn is_fitted(&self) -> bool {
        self.root.is_some()
    }

    /// Leaf payload for one row
    pub fn leaf_value(&self, row: ArrayView1<f64>) -> &[f64] {
        let mut node = match &self.root {
            Some(root) => root,
            None => return &[],
        };
        loop {
            match node {
                Node::Leaf { value } => return value,
                Node::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { &**left } else { &**right };
                }
            }
        }
    }

    /// Normalized impurity decrease per feature
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        self.root.as_ref().map_or(0, walk)
    }
}
