use ghostdex_btree::TreeConfig;
use ghostdex_common::{Result, verify_arg};
use ghostdex_serial::{PackerConfig, Value};
use serde::{Deserialize, Serialize};

/// Shape of an index: the term table, the postings trees and the bins that
/// hold the postings of small terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub node_min: usize,
    pub postings_node_min: usize,
    pub packer_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            node_min: TreeConfig::default().node_min,
            postings_node_min: 8,
            packer_capacity: PackerConfig::default().capacity,
        }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<()> {
        self.terms().validate()?;
        self.postings().validate()?;
        verify_arg!(packer_capacity, self.packer_capacity > 0);
        Ok(())
    }

    pub fn terms(&self) -> TreeConfig {
        TreeConfig {
            node_min: self.node_min,
        }
    }

    pub fn postings(&self) -> TreeConfig {
        TreeConfig {
            node_min: self.postings_node_min,
        }
    }

    pub fn packer(&self) -> PackerConfig {
        PackerConfig {
            capacity: self.packer_capacity,
        }
    }

    pub(crate) fn to_value(self) -> Value {
        Value::map([
            ("node_min", Value::from(self.node_min)),
            ("postings_node_min", Value::from(self.postings_node_min)),
            ("packer_capacity", Value::from(self.packer_capacity)),
        ])
    }

    pub(crate) fn from_value(value: &Value) -> Result<IndexConfig> {
        let config = IndexConfig {
            node_min: value.field("node_min")?.as_usize("node_min")?,
            postings_node_min: value.field("postings_node_min")?.as_usize("postings_node_min")?,
            packer_capacity: value.field("packer_capacity")?.as_usize("packer_capacity")?,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.node_min, 16);
        assert_eq!(config.packer().capacity, 256);
        config.validate().unwrap();
        assert_eq!(IndexConfig::from_value(&config.to_value()).unwrap(), config);
    }

    #[test]
    fn test_invalid() {
        let config = IndexConfig {
            postings_node_min: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        let config = IndexConfig {
            packer_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: IndexConfig = serde_json::from_str(r#"{ "node_min": 4 }"#).unwrap();
        assert_eq!(config.node_min, 4);
        assert_eq!(config.postings_node_min, 8);
    }
}
