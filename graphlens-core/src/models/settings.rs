use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Panel preferences persisted next to the history.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub starred_groups: Vec<String>,
}

impl Settings {
    pub fn is_starred(&self, group: &str) -> bool {
        self.starred_groups.iter().any(|g| g == group)
    }

    /// Flip the starred state of a group. Returns the new state.
    pub fn toggle_star(&mut self, group: &str) -> bool {
        if let Some(pos) = self.starred_groups.iter().position(|g| g == group) {
            self.starred_groups.remove(pos);
            false
        } else {
            self.starred_groups.push(group.to_string());
            true
        }
    }
}
