//! Physical key layout
//!
//! ```text
//! {prefix}:version              current version token
//! {prefix}:v{token}:{key}       entry written under `token`
//! {prefix}:tag:{tag}            set of logical keys carrying `tag`
//! ```
//!
//! Tag sets hold logical keys, so tag membership survives a version bump.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version_key(&self) -> String {
        format!("{}:version", self.prefix)
    }

    pub fn entry(&self, version: &str, key: &str) -> String {
        format!("{}:v{}:{}", self.prefix, version, key)
    }

    /// Glob over logical keys, scoped to one version
    pub fn entry_pattern(&self, version: &str, glob: &str) -> String {
        format!("{}:v{}:{}", self.prefix, version, glob)
    }

    pub fn tag(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }

    pub fn tag_pattern(&self) -> String {
        format!("{}:tag:*", self.prefix)
    }

    /// Tag name back out of a tag set key
    pub fn tag_name<'a>(&self, tag_key: &'a str) -> Option<&'a str> {
        tag_key
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(":tag:"))
    }
}
