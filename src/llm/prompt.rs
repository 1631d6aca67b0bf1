use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Maps a style keyword to the instruction placed in front of the user text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTable {
    pub default_prefix: String,
    #[serde(default)]
    pub styles: BTreeMap<String, String>,
    #[serde(default)]
    pub suffix: String,
}

impl Default for PromptTable {
    fn default() -> Self {
        Self::plain("paraphrase: ", " </s>")
    }
}

impl PromptTable {
    /// Same instruction for every style.
    pub fn plain(prefix: &str, suffix: &str) -> Self {
        Self {
            default_prefix: prefix.to_string(),
            styles: BTreeMap::new(),
            suffix: suffix.to_string(),
        }
    }

    /// Indonesian instructions per style.
    pub fn styled() -> Self {
        let styles = [
            ("default", "parafrasekan: "),
            ("formal", "parafrasekan dengan bahasa formal: "),
            ("casual", "parafrasekan dengan bahasa santai: "),
            ("creative", "parafrasekan secara kreatif: "),
            ("simple", "parafrasekan dengan bahasa sederhana: "),
        ]
        .into_iter()
        .map(|(style, prefix)| (style.to_string(), prefix.to_string()))
        .collect();

        Self {
            default_prefix: "parafrasekan: ".to_string(),
            styles,
            suffix: String::new(),
        }
    }

    /// Instruction for `style`; unknown styles get the default one.
    pub fn prefix(&self, style: &str) -> &str {
        let key = style.trim().to_lowercase();
        self.styles
            .get(&key)
            .map(String::as_str)
            .unwrap_or(&self.default_prefix)
    }

    pub fn build(&self, style: &str, text: &str) -> String {
        format!("{}{}{}", self.prefix(style), text, self.suffix)
    }
}
