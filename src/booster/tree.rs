use crate::booster::binning::BinnedData;
use crate::booster::config::BoosterConfig;
use hashbrown::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Splits with a gain at or below this are treated as noise.
const MIN_SPLIT_GAIN: f64 = 1e-12;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Node {
    pub num: usize,
    pub weight_value: f64,
    /// Number of training rows that reached the node (the hessian sum under
    /// squared error).
    pub hessian_sum: f64,
    pub depth: usize,
    pub split_value: f64,
    pub split_feature: usize,
    pub split_gain: f64,
    pub left_child: usize,
    pub right_child: usize,
    pub is_leaf: bool,
}

impl Node {
    fn leaf(num: usize, weight_value: f64, hessian_sum: f64, depth: usize) -> Self {
        Node {
            num,
            weight_value,
            hessian_sum,
            depth,
            split_value: 0.0,
            split_feature: 0,
            split_gain: 0.0,
            left_child: 0,
            right_child: 0,
            is_leaf: true,
        }
    }

    /// Values strictly below the split value go left.
    #[inline]
    pub fn get_child_idx(&self, v: f64) -> usize {
        if v < self.split_value {
            self.left_child
        } else {
            self.right_child
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitInfo {
    feature: usize,
    bin: usize,
    gain: f64,
}

#[inline]
fn weight(gradient_sum: f64, hessian_sum: f64, lambda: f64) -> f64 {
    -gradient_sum / (hessian_sum + lambda)
}

#[inline]
fn gain(gradient_sum: f64, hessian_sum: f64, lambda: f64) -> f64 {
    (gradient_sum * gradient_sum) / (hessian_sum + lambda)
}

/// Best split of one feature for the rows in `index`, scanning the bin
/// boundaries in ascending order. Only a strictly larger gain replaces an
/// earlier boundary.
fn best_feature_split(
    binned: &BinnedData,
    rows: usize,
    feature: usize,
    index: &[usize],
    grad: &[f64],
    cfg: &BoosterConfig,
) -> Option<SplitInfo> {
    let n_bins = binned.n_bins(feature);
    if n_bins < 3 {
        return None;
    }
    let col = binned.get_col(feature, rows);
    let mut hist = vec![(0.0_f64, 0.0_f64); n_bins];
    for i in index {
        let h = &mut hist[col[*i] as usize];
        h.0 += grad[*i];
        h.1 += 1.0;
    }
    let (g_total, h_total) = hist.iter().fold((0.0, 0.0), |acc, h| (acc.0 + h.0, acc.1 + h.1));
    let parent_gain = gain(g_total, h_total, cfg.lambda);

    let mut best: Option<SplitInfo> = None;
    let (mut gl, mut hl) = (0.0, 0.0);
    for b in 1..n_bins {
        gl += hist[b - 1].0;
        hl += hist[b - 1].1;
        let (gr, hr) = (g_total - gl, h_total - hl);
        if hl < cfg.min_child_weight || hr < cfg.min_child_weight {
            continue;
        }
        let split_gain = gain(gl, hl, cfg.lambda) + gain(gr, hr, cfg.lambda) - parent_gain;
        if split_gain > MIN_SPLIT_GAIN && best.map_or(true, |s| split_gain > s.gain) {
            best = Some(SplitInfo {
                feature,
                bin: b,
                gain: split_gain,
            });
        }
    }
    best
}

/// A single regression tree, grown depth wise on binned data.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub depth: usize,
}

impl Tree {
    /// Fit a tree to the gradients of the rows in `index`.
    ///
    /// * `binned` - Binned training data.
    /// * `rows` - Total number of rows in `binned`.
    /// * `index` - Rows used to grow this tree.
    /// * `grad` - Gradient of every row, the hessian is constant.
    pub fn fit(binned: &BinnedData, rows: usize, index: Vec<usize>, grad: &[f64], cfg: &BoosterConfig) -> Self {
        let lr = cfg.hyperparameters.learning_rate;
        let max_depth = cfg.hyperparameters.max_depth;
        let n_features = binned.cuts.cols;

        let root_grad: f64 = index.iter().map(|i| grad[*i]).sum();
        let root_hess = index.len() as f64;
        let mut tree = Tree {
            nodes: vec![Node::leaf(0, weight(root_grad, root_hess, cfg.lambda) * lr, root_hess, 0)],
            depth: 0,
        };

        let mut queue = VecDeque::new();
        queue.push_back((0_usize, index));
        while let Some((num, index)) = queue.pop_front() {
            let depth = tree.nodes[num].depth;
            if depth >= max_depth || (index.len() as f64) < 2.0 * cfg.min_child_weight {
                continue;
            }
            let candidates: Vec<Option<SplitInfo>> = (0..n_features)
                .into_par_iter()
                .map(|f| best_feature_split(binned, rows, f, &index, grad, cfg))
                .collect();
            let best = candidates.into_iter().flatten().fold(None, |acc: Option<SplitInfo>, s| match acc {
                Some(a) if a.gain >= s.gain => Some(a),
                _ => Some(s),
            });
            let Some(split) = best else {
                continue;
            };

            let col = binned.get_col(split.feature, rows);
            let (left, right): (Vec<usize>, Vec<usize>) =
                index.into_iter().partition(|i| (col[*i] as usize) < split.bin);
            let left_num = tree.nodes.len();
            let right_num = left_num + 1;
            for (n, side) in [(left_num, &left), (right_num, &right)] {
                let g: f64 = side.iter().map(|i| grad[*i]).sum();
                let h = side.len() as f64;
                tree.nodes.push(Node::leaf(n, weight(g, h, cfg.lambda) * lr, h, depth + 1));
            }
            let node = &mut tree.nodes[num];
            node.is_leaf = false;
            node.split_feature = split.feature;
            node.split_value = binned.cuts.get_col(split.feature)[split.bin - 1];
            node.split_gain = split.gain;
            node.left_child = left_num;
            node.right_child = right_num;
            tree.depth = tree.depth.max(depth + 1);

            queue.push_back((left_num, left));
            queue.push_back((right_num, right));
        }
        tree
    }

    /// Predict a single row, `value` returns the row's value of a feature.
    #[inline]
    pub fn predict_with<F: Fn(usize) -> f64>(&self, value: F) -> f64 {
        let mut node = &self.nodes[0];
        while !node.is_leaf {
            node = &self.nodes[node.get_child_idx(value(node.split_feature))];
        }
        node.weight_value
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.predict_with(|f| row[f])
    }

    /// Cover weighted average of the leaf values below `node`.
    pub fn get_average_leaf_weights(&self, node: usize) -> f64 {
        let n = &self.nodes[node];
        if n.is_leaf {
            return n.weight_value;
        }
        let l = &self.nodes[n.left_child];
        let r = &self.nodes[n.right_child];
        (l.hessian_sum * self.get_average_leaf_weights(n.left_child)
            + r.hessian_sum * self.get_average_leaf_weights(n.right_child))
            / n.hessian_sum
    }

    pub fn calculate_importance_weight(&self, stats: &mut HashMap<usize, (f64, usize)>) {
        for n in self.nodes.iter().filter(|n| !n.is_leaf) {
            let e = stats.entry(n.split_feature).or_insert((0.0, 0));
            e.0 += 1.0;
            e.1 += 1;
        }
    }

    pub fn calculate_importance_gain(&self, stats: &mut HashMap<usize, (f64, usize)>) {
        for n in self.nodes.iter().filter(|n| !n.is_leaf) {
            let e = stats.entry(n.split_feature).or_insert((0.0, 0));
            e.0 += n.split_gain;
            e.1 += 1;
        }
    }

    pub fn calculate_importance_cover(&self, stats: &mut HashMap<usize, (f64, usize)>) {
        for n in self.nodes.iter().filter(|n| !n.is_leaf) {
            let e = stats.entry(n.split_feature).or_insert((0.0, 0));
            e.0 += n.hessian_sum;
            e.1 += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::binning::bin_matrix;
    use crate::booster::config::Hyperparameters;
    use crate::data::Matrix;

    fn step_cfg(max_depth: usize) -> BoosterConfig {
        BoosterConfig {
            lambda: 0.0,
            ..BoosterConfig::from(Hyperparameters::new(1.0, max_depth, 1, 1.0))
        }
    }

    #[test]
    fn test_tree_fits_step() {
        // y = 0 below 5, 10 from 5 on. Gradient of a zero prediction is -y.
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| if *v < 5.0 { 0.0 } else { 10.0 }).collect();
        let grad: Vec<f64> = y.iter().map(|v| -v).collect();
        let data = Matrix::new(&x, 10, 1);
        let binned = bin_matrix(&data, 256).unwrap();
        let tree = Tree::fit(&binned, 10, (0..10).collect(), &grad, &step_cfg(1));
        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.depth, 1);
        assert_eq!(tree.nodes[0].split_value, 5.0);
        assert_eq!(tree.predict_row(&[4.0]), 0.0);
        assert_eq!(tree.predict_row(&[7.0]), 10.0);
        assert!((tree.get_average_leaf_weights(0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_tree_respects_depth_and_constant_target() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let grad = vec![0.0; 20];
        let data = Matrix::new(&x, 20, 1);
        let binned = bin_matrix(&data, 256).unwrap();
        let tree = Tree::fit(&binned, 20, (0..20).collect(), &grad, &step_cfg(3));
        // Nothing to gain, the root stays a leaf.
        assert_eq!(tree.nodes.len(), 1);

        let grad: Vec<f64> = x.iter().map(|v| -(v * v)).collect();
        let tree = Tree::fit(&binned, 20, (0..20).collect(), &grad, &step_cfg(3));
        assert!(tree.depth <= 3);
        assert!(tree.nodes.iter().all(|n| n.depth <= 3));
    }

    #[test]
    fn test_importance_stats() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let grad: Vec<f64> = x.iter().map(|v| if *v < 5.0 { 0.0 } else { -10.0 }).collect();
        let data = Matrix::new(&x, 10, 1);
        let binned = bin_matrix(&data, 256).unwrap();
        let tree = Tree::fit(&binned, 10, (0..10).collect(), &grad, &step_cfg(1));
        let mut stats = HashMap::new();
        tree.calculate_importance_weight(&mut stats);
        assert_eq!(stats[&0], (1.0, 1));
        let mut stats = HashMap::new();
        tree.calculate_importance_cover(&mut stats);
        assert_eq!(stats[&0], (10.0, 1));
    }
}
