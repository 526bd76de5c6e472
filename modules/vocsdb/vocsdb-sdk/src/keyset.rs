use serde::{Deserialize, Serialize};

/// Per-domain named keypad preset. `get_keyset_layout` on an unset name
/// returns [`KeysetLayout::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KeysetLayout {
    pub site_scaling: f64,
    pub name_scaling: f64,
    pub font_scaling: f64,
    pub layout: String,
    pub loop_size: String,
}

impl Default for KeysetLayout {
    fn default() -> Self {
        Self {
            site_scaling: 1.0,
            name_scaling: 1.5,
            font_scaling: 1.0,
            layout: "auto_grid".to_owned(),
            loop_size: "15.625rem".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_wire_shape() {
        let expected = serde_json::json!({
            "site_scaling": 1.0,
            "name_scaling": 1.5,
            "font_scaling": 1.0,
            "layout": "auto_grid",
            "loop_size": "15.625rem",
        });
        assert_eq!(serde_json::to_value(KeysetLayout::default()).unwrap(), expected);
    }
}
