//! Owned carriers for the externally supplied mesh tables.
//!
//! The geometric mesh container itself is an external collaborator; what the
//! index layer ingests are its raw per-entity tables: coordinate blocks with
//! their global-node-id lists and node→element adjacency, and element blocks
//! with their connectivity tables and global-element-id lists, plus the two
//! mesh-wide totals agreed before any partitioning decision.

use crate::repart_error::MeshRepartError;

/// One coordinate block: per-row coordinates, global node ids, and the
/// global ids of the elements touching each node.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct NodeBlock {
    pub coords: Vec<Vec<f64>>,
    pub global_ids: Vec<u64>,
    pub elem_connectivity: Vec<Vec<u64>>,
}

impl NodeBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one node row.
    pub fn push_row(&mut self, coords: Vec<f64>, global_id: u64, elem_conn: Vec<u64>) {
        self.coords.push(coords);
        self.global_ids.push(global_id);
        self.elem_connectivity.push(elem_conn);
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// All row lists must agree in length.
    pub fn validate(&self) -> Result<(), MeshRepartError> {
        if self.global_ids.len() != self.coords.len() {
            return Err(MeshRepartError::BlockLengthMismatch {
                context: "node block global ids",
                expected: self.coords.len(),
                found: self.global_ids.len(),
            });
        }
        if self.elem_connectivity.len() != self.coords.len() {
            return Err(MeshRepartError::BlockLengthMismatch {
                context: "node block element connectivity",
                expected: self.coords.len(),
                found: self.elem_connectivity.len(),
            });
        }
        Ok(())
    }
}

/// One element block: per-row node connectivity and global element ids.
/// Connectivity entries are raw (untagged) global node ids.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ElementBlock {
    pub connectivity: Vec<Vec<u64>>,
    pub global_ids: Vec<u64>,
}

impl ElementBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one element row.
    pub fn push_row(&mut self, connectivity: Vec<u64>, global_id: u64) {
        self.connectivity.push(connectivity);
        self.global_ids.push(global_id);
    }

    pub fn len(&self) -> usize {
        self.connectivity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectivity.is_empty()
    }

    pub fn validate(&self) -> Result<(), MeshRepartError> {
        if self.global_ids.len() != self.connectivity.len() {
            return Err(MeshRepartError::BlockLengthMismatch {
                context: "element block global ids",
                expected: self.connectivity.len(),
                found: self.global_ids.len(),
            });
        }
        Ok(())
    }
}

/// Everything the mesh container hands over for one partitioning round.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct MeshParts {
    pub node_blocks: Vec<NodeBlock>,
    pub element_blocks: Vec<ElementBlock>,
    /// Mesh-wide node count, agreed across all ranks.
    pub total_nodes: u64,
    /// Mesh-wide element (cell) count, agreed across all ranks.
    pub total_elements: u64,
}

impl MeshParts {
    pub fn validate(&self) -> Result<(), MeshRepartError> {
        for block in &self.node_blocks {
            block.validate()?;
        }
        for block in &self.element_blocks {
            block.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_validate() {
        let mut nodes = NodeBlock::new();
        nodes.push_row(vec![0.0, 0.0], 0, vec![0]);
        nodes.push_row(vec![1.0, 0.0], 1, vec![0]);
        assert_eq!(nodes.len(), 2);
        nodes.validate().unwrap();

        let mut elems = ElementBlock::new();
        elems.push_row(vec![0, 1], 0);
        elems.validate().unwrap();
    }

    #[test]
    fn mismatched_lists_are_rejected() {
        let block = NodeBlock {
            coords: vec![vec![0.0]],
            global_ids: vec![],
            elem_connectivity: vec![vec![]],
        };
        assert!(matches!(
            block.validate(),
            Err(MeshRepartError::BlockLengthMismatch { .. })
        ));
    }
}
