//! Path dependent TreeSHAP over the binary trees of the booster.
use crate::booster::tree::{Node, Tree};

#[derive(Debug, Clone, Copy, Default)]
struct PathElement {
    feature_index: usize,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

#[derive(Debug, Clone, Default)]
struct PathList {
    paths: Vec<PathElement>,
}

impl PathList {
    fn get_element(&mut self, i: usize) -> &PathElement {
        if i == self.paths.len() {
            self.paths.push(PathElement::default());
        }
        &self.paths[i]
    }

    fn get_element_mut(&mut self, i: usize) -> &mut PathElement {
        if i == self.paths.len() {
            self.paths.push(PathElement::default());
        }
        &mut self.paths[i]
    }
}

fn extend_path(
    unique_path: &mut PathList,
    unique_depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature_index: usize,
) {
    let el = unique_path.get_element_mut(unique_depth);
    el.feature_index = feature_index;
    el.zero_fraction = zero_fraction;
    el.one_fraction = one_fraction;
    el.pweight = if unique_depth == 0 { 1.0 } else { 0.0 };
    let depth_plus = (unique_depth + 1) as f64;
    for i in (0..unique_depth).rev() {
        let pw = unique_path.get_element(i).pweight;
        unique_path.get_element_mut(i + 1).pweight += (one_fraction * pw * (i + 1) as f64) / depth_plus;
        unique_path.get_element_mut(i).pweight = (zero_fraction * pw * (unique_depth - i) as f64) / depth_plus;
    }
}

fn unwind_path(unique_path: &mut PathList, unique_depth: usize, path_index: usize) {
    let one_fraction = unique_path.get_element(path_index).one_fraction;
    let zero_fraction = unique_path.get_element(path_index).zero_fraction;
    let mut next_one_portion = unique_path.get_element(unique_depth).pweight;
    let depth_plus = (unique_depth + 1) as f64;
    for i in (0..unique_depth).rev() {
        if one_fraction != 0. {
            let tmp = unique_path.get_element(i).pweight;
            let pw = (next_one_portion * depth_plus) / ((i + 1) as f64 * one_fraction);
            unique_path.get_element_mut(i).pweight = pw;
            next_one_portion = tmp - (pw * zero_fraction * (unique_depth - i) as f64) / depth_plus;
        } else {
            let pw = unique_path.get_element(i).pweight;
            unique_path.get_element_mut(i).pweight = (pw * depth_plus) / (zero_fraction * (unique_depth - i) as f64);
        }
    }
    for i in path_index..unique_depth {
        let next = unique_path.paths[i + 1];
        let el = unique_path.get_element_mut(i);
        el.feature_index = next.feature_index;
        el.zero_fraction = next.zero_fraction;
        el.one_fraction = next.one_fraction;
    }
}

fn unwound_path_sum(unique_path: &mut PathList, unique_depth: usize, path_index: usize) -> f64 {
    let one_fraction = unique_path.get_element(path_index).one_fraction;
    let zero_fraction = unique_path.get_element(path_index).zero_fraction;
    let mut next_one_portion = unique_path.get_element(unique_depth).pweight;
    let depth_plus = (unique_depth + 1) as f64;
    let mut total = 0.0;
    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let tmp = (next_one_portion * depth_plus) / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion =
                unique_path.get_element(i).pweight - tmp * zero_fraction * ((unique_depth - i) as f64 / depth_plus);
        } else if zero_fraction != 0.0 {
            total += (unique_path.get_element(i).pweight / zero_fraction) / ((unique_depth - i) as f64 / depth_plus);
        }
    }
    total
}

/// The child the row follows first, then the other one.
fn get_hot_cold_children(next_node_idx: usize, node: &Node) -> [usize; 2] {
    if next_node_idx == node.right_child {
        [node.right_child, node.left_child]
    } else {
        [node.left_child, node.right_child]
    }
}

#[allow(clippy::too_many_arguments)]
fn tree_shap(
    tree: &Tree,
    row: &[f64],
    contribs: &mut [f64],
    node_index: usize,
    mut unique_depth: usize,
    mut unique_path: PathList,
    parent_zero_fraction: f64,
    parent_one_fraction: f64,
    parent_feature_index: usize,
) {
    let node = &tree.nodes[node_index];
    extend_path(
        &mut unique_path,
        unique_depth,
        parent_zero_fraction,
        parent_one_fraction,
        parent_feature_index,
    );
    if node.is_leaf {
        for i in 1..(unique_depth + 1) {
            let w = unwound_path_sum(&mut unique_path, unique_depth, i);
            let el = unique_path.get_element(i);
            contribs[el.feature_index] += w * (el.one_fraction - el.zero_fraction) * node.weight_value;
        }
    } else {
        let next_node_idx = node.get_child_idx(row[node.split_feature]);
        let hot_cold_children = get_hot_cold_children(next_node_idx, node);
        let mut incoming_zero_fraction = 1.0;
        let mut incoming_one_fraction = 1.0;

        let mut path_index = 0;
        while path_index <= unique_depth {
            if unique_path.get_element(path_index).feature_index == node.split_feature {
                break;
            }
            path_index += 1;
        }

        if path_index != (unique_depth + 1) {
            incoming_zero_fraction = unique_path.get_element(path_index).zero_fraction;
            incoming_one_fraction = unique_path.get_element(path_index).one_fraction;
            unwind_path(&mut unique_path, unique_depth, path_index);
            unique_depth -= 1;
        }

        for (i, n_idx) in hot_cold_children.into_iter().enumerate() {
            let zero_fraction = (tree.nodes[n_idx].hessian_sum / node.hessian_sum) * incoming_zero_fraction;
            let onf = if i == 0 { incoming_one_fraction } else { 0. };
            tree_shap(
                tree,
                row,
                contribs,
                n_idx,
                unique_depth + 1,
                unique_path.clone(),
                zero_fraction,
                onf,
                node.split_feature,
            )
        }
    }
}

/// Add the Shapley contributions of one tree for `row` into `contribs`.
/// The last slot of `contribs` is the bias term and receives the tree's
/// expected value.
pub fn predict_contributions_row_shapley(tree: &Tree, row: &[f64], contribs: &mut [f64]) {
    let bias = contribs.len() - 1;
    contribs[bias] += tree.get_average_leaf_weights(0);
    tree_shap(tree, row, contribs, 0, 0, PathList::default(), 1., 1., row.len() + 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::tree::Node;

    fn split(num: usize, feature: usize, value: f64, left: usize, right: usize, cover: f64) -> Node {
        Node {
            num,
            weight_value: 0.0,
            hessian_sum: cover,
            depth: 0,
            split_value: value,
            split_feature: feature,
            split_gain: 1.0,
            left_child: left,
            right_child: right,
            is_leaf: false,
        }
    }

    fn leaf(num: usize, weight_value: f64, cover: f64) -> Node {
        Node {
            num,
            weight_value,
            hessian_sum: cover,
            depth: 1,
            split_value: f64::NAN,
            split_feature: 0,
            split_gain: 0.0,
            left_child: 0,
            right_child: 0,
            is_leaf: true,
        }
    }

    #[test]
    fn test_single_split_contributions() {
        // x0 < 0.5 -> 1.0 (cover 3), else 5.0 (cover 1).
        let tree = Tree {
            nodes: vec![split(0, 0, 0.5, 1, 2, 4.0), leaf(1, 1.0, 3.0), leaf(2, 5.0, 1.0)],
            depth: 1,
        };
        let mut contribs = vec![0.0; 3];
        predict_contributions_row_shapley(&tree, &[1.0, 7.0], &mut contribs);
        assert!((contribs[2] - 2.0).abs() < 1e-12);
        assert!((contribs[0] - 3.0).abs() < 1e-12);
        assert_eq!(contribs[1], 0.0);
    }

    #[test]
    fn test_contributions_sum_to_prediction() {
        // Two features, depth two, feature 0 used twice on one path.
        let tree = Tree {
            nodes: vec![
                split(0, 0, 0.5, 1, 2, 10.0),
                split(1, 1, 2.0, 3, 4, 6.0),
                split(2, 0, 1.5, 5, 6, 4.0),
                leaf(3, -1.0, 2.0),
                leaf(4, 2.0, 4.0),
                leaf(5, 3.0, 1.0),
                leaf(6, 0.5, 3.0),
            ],
            depth: 2,
        };
        for row in [[0.0, 1.0], [0.0, 3.0], [1.0, 0.0], [2.0, 9.0]] {
            let mut contribs = vec![0.0; 3];
            predict_contributions_row_shapley(&tree, &row, &mut contribs);
            let total: f64 = contribs.iter().sum();
            assert!((total - tree.predict_row(&row)).abs() < 1e-10);
        }
    }
}
