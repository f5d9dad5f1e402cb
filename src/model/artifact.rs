//! Pre-trained model artifact: a gradient boosted tree ensemble plus the
//! ordered feature-column list and training-time category lists it expects.
//!
//! The artifact is two JSON files exported at training time. It is loaded
//! once, validated, and never mutated; the per-node expected values used by
//! the contribution decomposition are precomputed here so scoring stays a
//! pure tree walk.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// One node of a binary decision tree, in a flattened node array.
/// Leaves carry the margin-space weight; splits carry the feature index,
/// threshold, child indices and the default branch for missing values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default)]
        default_left: bool,
        cover: f64,
    },
    Leaf {
        leaf: f64,
        cover: f64,
    },
}

impl TreeNode {
    fn cover(&self) -> f64 {
        match self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => *cover,
        }
    }
}

/// A single tree; node 0 is the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Walk the tree for one feature row. NaN cells take the default branch.
    pub fn walk(&self, features: &[f32]) -> TreePath {
        let mut path = Vec::new();
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { leaf, .. } => {
                    return TreePath {
                        steps: path,
                        leaf_value: *leaf,
                    }
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                    ..
                } => {
                    let value = features[*feature];
                    let go_left = if value.is_nan() {
                        *default_left
                    } else {
                        (value as f64) < *threshold
                    };
                    let next = if go_left { *left } else { *right };
                    path.push(PathStep {
                        feature: *feature,
                        from: idx,
                        to: next,
                    });
                    idx = next;
                }
            }
        }
    }
}

/// One split decision taken during a tree walk.
pub struct PathStep {
    pub feature: usize,
    pub from: usize,
    pub to: usize,
}

/// The decisions and terminal weight of one tree walk.
pub struct TreePath {
    pub steps: Vec<PathStep>,
    pub leaf_value: f64,
}

/// Serialized classifier: base margin plus the tree ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtModel {
    /// Model version recorded at training time
    #[serde(default)]
    pub version: String,
    /// Base margin added to every prediction
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

/// Ordered expected feature columns and the fixed training-time category
/// lists used to reconstruct the one-hot column set at scoring time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelColumns {
    pub columns: Vec<String>,
    #[serde(default)]
    pub segment_categories: Vec<String>,
    #[serde(default)]
    pub cost_center_categories: Vec<String>,
}

/// Validated, immutable model artifact with precomputed per-node expected
/// values (cover-weighted averages of the leaves below each node).
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub model: GbdtModel,
    pub columns: ModelColumns,
    /// node_values[tree][node] = expected margin contribution below node
    node_values: Vec<Vec<f64>>,
}

impl ModelArtifact {
    /// Build an artifact from in-memory parts, validating tree structure
    /// against the column list. Test fixtures inject fakes through here.
    pub fn new(model: GbdtModel, columns: ModelColumns) -> Result<Self, ModelError> {
        let node_values = model
            .trees
            .iter()
            .enumerate()
            .map(|(i, tree)| validate_and_value_tree(i, tree, columns.columns.len()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            model,
            columns,
            node_values,
        })
    }

    /// Load the classifier and its feature-list companion from disk.
    /// A missing file is reported as such; corruption carries the parse
    /// cause. The two conditions need different operator responses.
    pub fn load<P: AsRef<Path>>(model_path: P, columns_path: P) -> Result<Self, ModelError> {
        let model: GbdtModel = read_json(model_path.as_ref())?;
        let columns: ModelColumns = read_json(columns_path.as_ref())?;

        info!(
            version = %model.version,
            trees = model.trees.len(),
            columns = columns.columns.len(),
            "Model artifact loaded"
        );
        Self::new(model, columns)
    }

    pub fn n_features(&self) -> usize {
        self.columns.columns.len()
    }

    /// Expected margin value below a node, used by the contribution walk.
    pub fn node_value(&self, tree: usize, node: usize) -> f64 {
        self.node_values[tree][node]
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    if !path.exists() {
        return Err(ModelError::ArtifactNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| ModelError::ArtifactUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ModelError::ArtifactCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Check node indices and feature references, then compute the expected
/// value of every node bottom-up: a leaf is its weight, a split is the
/// cover-weighted average of its children.
fn validate_and_value_tree(
    tree_idx: usize,
    tree: &Tree,
    n_columns: usize,
) -> Result<Vec<f64>, ModelError> {
    let n = tree.nodes.len();
    if n == 0 {
        return Err(ModelError::MalformedTree(format!("tree {tree_idx} is empty")));
    }

    for node in &tree.nodes {
        if let TreeNode::Split {
            feature,
            left,
            right,
            ..
        } = node
        {
            if *feature >= n_columns {
                return Err(ModelError::FeatureIndexOutOfRange {
                    index: *feature,
                    columns: n_columns,
                });
            }
            if *left >= n || *right >= n {
                return Err(ModelError::MalformedTree(format!(
                    "tree {tree_idx} has child index out of range ({left}, {right} >= {n})"
                )));
            }
        }
    }

    let mut values = vec![None::<f64>; n];
    // Children always appear after their parent in the exported layout, so a
    // single reverse pass resolves every node.
    for idx in (0..n).rev() {
        let value = match &tree.nodes[idx] {
            TreeNode::Leaf { leaf, .. } => *leaf,
            TreeNode::Split { left, right, .. } => {
                let (lv, rv) = match (values[*left], values[*right]) {
                    (Some(l), Some(r)) => (l, r),
                    _ => {
                        return Err(ModelError::MalformedTree(format!(
                            "tree {tree_idx} is not topologically ordered at node {idx}"
                        )))
                    }
                };
                let lc = tree.nodes[*left].cover();
                let rc = tree.nodes[*right].cover();
                let total = lc + rc;
                if total <= 0.0 {
                    return Err(ModelError::MalformedTree(format!(
                        "tree {tree_idx} node {idx} has non-positive child cover"
                    )));
                }
                (lc * lv + rc * rv) / total
            }
        };
        values[idx] = Some(value);
    }

    Ok(values.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump() -> Tree {
        Tree {
            nodes: vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 10.0,
                    left: 1,
                    right: 2,
                    default_left: true,
                    cover: 100.0,
                },
                TreeNode::Leaf {
                    leaf: -1.0,
                    cover: 75.0,
                },
                TreeNode::Leaf {
                    leaf: 3.0,
                    cover: 25.0,
                },
            ],
        }
    }

    fn columns(n: usize) -> ModelColumns {
        ModelColumns {
            columns: (0..n).map(|i| format!("F{i}")).collect(),
            segment_categories: vec![],
            cost_center_categories: vec![],
        }
    }

    #[test]
    fn test_node_values_are_cover_weighted() {
        let model = GbdtModel {
            version: "test".into(),
            base_score: 0.0,
            trees: vec![stump()],
        };
        let artifact = ModelArtifact::new(model, columns(1)).unwrap();

        // Root expectation: (75 * -1.0 + 25 * 3.0) / 100 = 0.0
        assert_eq!(artifact.node_value(0, 0), 0.0);
        assert_eq!(artifact.node_value(0, 1), -1.0);
        assert_eq!(artifact.node_value(0, 2), 3.0);
    }

    #[test]
    fn test_walk_routes_nan_to_default_branch() {
        let tree = stump();
        assert_eq!(tree.walk(&[5.0]).leaf_value, -1.0);
        assert_eq!(tree.walk(&[50.0]).leaf_value, 3.0);
        // default_left = true
        assert_eq!(tree.walk(&[f32::NAN]).leaf_value, -1.0);
    }

    #[test]
    fn test_feature_index_out_of_range_rejected() {
        let model = GbdtModel {
            version: String::new(),
            base_score: 0.0,
            trees: vec![stump()],
        };
        match ModelArtifact::new(model, columns(0)) {
            Err(ModelError::FeatureIndexOutOfRange { index: 0, columns: 0 }) => {}
            other => panic!("expected FeatureIndexOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("churn_model.json");
        let columns_path = dir.path().join("model_columns.json");
        std::fs::write(&columns_path, r#"{"columns":[]}"#).unwrap();

        match ModelArtifact::load(&missing, &columns_path) {
            Err(ModelError::ArtifactNotFound(path)) => assert_eq!(path, missing),
            other => panic!("expected ArtifactNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_file_is_distinct_from_missing() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("churn_model.json");
        let columns_path = dir.path().join("model_columns.json");
        std::fs::write(&model_path, "not json").unwrap();
        std::fs::write(&columns_path, r#"{"columns":[]}"#).unwrap();

        assert!(matches!(
            ModelArtifact::load(&model_path, &columns_path),
            Err(ModelError::ArtifactCorrupt { .. })
        ));
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let model = GbdtModel {
            version: "2024.01".into(),
            base_score: -0.5,
            trees: vec![stump()],
        };
        let json = serde_json::to_string(&model).unwrap();
        let back: GbdtModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back.trees.len(), 1);
        assert_eq!(back.base_score, -0.5);
        assert!(matches!(back.trees[0].nodes[0], TreeNode::Split { .. }));
    }
}
