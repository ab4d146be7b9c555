use serde::{Deserialize, Serialize};

/// Options controlling what an export includes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Also export record fields whose name does not start with an
    /// uppercase letter.
    pub include_unexported: bool,
    /// Deepest nesting at which objects are still defined; the root is at
    /// depth 0. Deeper objects become `ref` elements. `None` means no limit.
    pub max_depth: Option<usize>,
}

impl ExportOptions {
    /// Options that export every field.
    pub fn all_fields() -> Self {
        Self {
            include_unexported: true,
            ..Self::default()
        }
    }

    /// Stop defining objects below `depth`.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}
