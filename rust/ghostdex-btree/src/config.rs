use ghostdex_common::{Result, verify_arg};

/// Shape parameters of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Minimum number of children of a non-root internal node; at least 2.
    pub node_min: usize,
}

impl TreeConfig {
    pub fn validate(&self) -> Result<()> {
        verify_arg!(node_min, self.node_min >= 2);
        Ok(())
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig { node_min: 16 }
    }
}
