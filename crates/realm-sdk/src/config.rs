use serde::{Deserialize, Serialize};

/// Configuration for a [`Realm`](crate::Realm) session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealmConfig {
    /// Package path the namespace id is derived from.
    pub path: String,
    /// Upper bound on heap allocations for the session, including the
    /// objects loaded from the store. `None` is unbounded.
    pub max_allocations: Option<usize>,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            path: String::from("gno.land/r/main"),
            max_allocations: None,
        }
    }
}

impl RealmConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: RealmConfig = serde_json::from_str(r#"{"path":"gno.land/r/demo"}"#).unwrap();
        assert_eq!(config, RealmConfig::new("gno.land/r/demo"));
        assert_eq!(config.max_allocations, None);
    }

    #[test]
    fn builder_sets_limit() {
        let config = RealmConfig::new("gno.land/r/demo").with_max_allocations(16);
        assert_eq!(config.max_allocations, Some(16));
    }
}
