//! Controller configuration

use serde::{Deserialize, Serialize};

/// How the preview controller treats materialized outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Outputs start selected only when their size is > 0; unselected outputs stay out of the graph
    pub auto_select_nonempty: bool,
    /// Order each input's outputs A->Z by label
    pub sort_outputs: bool,
    /// Fetch output sizes while materializing
    pub fetch_output_sizes: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            auto_select_nonempty: true,
            sort_outputs: true,
            fetch_output_sizes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: ControllerConfig = serde_json::from_str(r#"{ "sort_outputs": false }"#).unwrap();
        assert!(!config.sort_outputs);
        assert!(config.auto_select_nonempty);
        assert!(config.fetch_output_sizes);
    }
}
