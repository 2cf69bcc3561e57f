//! Target: a configured unit of observation.

use serde::{Deserialize, Serialize};

/// Something the tracker looks at every cycle.
///
/// Created from configuration at startup and never mutated during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Target {
    /// Unique key in the state document.
    pub id: String,

    /// Page to load.
    pub url: String,

    /// Human-readable name for notifications. Falls back to `id`.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Selector that must be present before the page is read.
    #[serde(default)]
    pub wait_for: Option<String>,

    /// Selector whose presence means the resource no longer exists.
    #[serde(default)]
    pub not_found: Option<String>,

    /// Consent-banner buttons to click after navigation, tried in order.
    #[serde(default)]
    pub consent: Vec<String>,

    /// Browser engine override for this target.
    #[serde(default)]
    pub engine: Option<Engine>,

    /// How to pull fields out of the page. `None` reads the whole body text.
    #[serde(default)]
    pub extract: Option<Extract>,

    /// Which extracted fields to keep.
    #[serde(default)]
    pub filter: Filter,
}

impl Target {
    /// The name shown to humans.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    /// A bare target reading the whole page body.
    #[cfg(test)]
    pub fn bare(id: &str, url: &str) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            display_name: None,
            wait_for: None,
            not_found: None,
            consent: Vec::new(),
            engine: None,
            extract: None,
            filter: Filter::default(),
        }
    }
}

/// Browser engine driven through WebDriver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Engine {
    #[default]
    Chromium,
    Firefox,
}

/// Extraction rule: where the values live in the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Extract {
    /// A single value, recorded as the field `value`.
    #[serde(rename_all = "kebab-case")]
    Text {
        selector: String,
        #[serde(default)]
        attr: Option<String>,
    },

    /// One field per repeated element, keyed by its name.
    #[serde(rename_all = "kebab-case")]
    List {
        item: String,
        name: String,
        #[serde(default)]
        name_attr: Option<String>,
        value: String,
        #[serde(default)]
        value_attr: Option<String>,
    },

    /// JSON embedded in an element attribute.
    ///
    /// `items`, `name`, and `value` are JSON pointers.
    #[serde(rename_all = "kebab-case")]
    EmbeddedJson {
        selector: String,
        attr: String,
        items: String,
        name: String,
        value: String,
    },
}

/// Field-name filter applied during normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Filter {
    /// Every substring must appear in the field name.
    #[serde(default)]
    pub include: Vec<String>,

    /// Any substring drops the field.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Filter {
    pub fn keeps(&self, name: &str) -> bool {
        self.include.iter().all(|s| name.contains(s.as_str()))
            && !self.exclude.iter().any(|s| name.contains(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_requires_all_includes_and_no_excludes() {
        let filter = Filter {
            include: vec!["RTX".into(), "5090".into()],
            exclude: vec!["Laptop".into()],
        };

        assert!(filter.keeps("ASUS RTX 5090 OC"));
        assert!(!filter.keeps("ASUS RTX 5080 OC"));
        assert!(!filter.keeps("Laptop RTX 5090"));
        assert!(Filter::default().keeps("anything"));
    }

    #[test]
    fn list_rule_parses_from_kebab_case() {
        let toml = r#"
            kind = "list"
            item = "li.product"
            name = "h3"
            value = ".price"
            value-attr = "data-price"
        "#;
        let rule: Extract = toml::from_str(toml).unwrap();

        assert_eq!(
            rule,
            Extract::List {
                item: "li.product".into(),
                name: "h3".into(),
                name_attr: None,
                value: ".price".into(),
                value_attr: Some("data-price".into()),
            }
        );
    }

    #[test]
    fn label_falls_back_to_id() {
        let mut target = Target::bare("inet", "https://www.inet.se");
        assert_eq!(target.label(), "inet");

        target.display_name = Some("inet.se".into());
        assert_eq!(target.label(), "inet.se");
    }
}
