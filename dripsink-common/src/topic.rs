//! Topic construction for the sink's namespace.
//!
//! Topics follow the pattern `<sink>/<kind>/<source>/<metric>`; the sink's
//! heartbeat lives at `<sink>/heartbeat`. All segments are plain ASCII
//! identifiers joined with `/`.

/// Delimiter between topic segments.
pub const DELIMITER: char = '/';

/// Builder for the sink's topic namespace.
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    root: String,
}

impl TopicBuilder {
    /// Create a builder rooted at the sink's own name.
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// The sink name every topic starts with.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Build the heartbeat topic: `<root>/heartbeat`.
    ///
    /// # Example
    /// ```
    /// use dripsink_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("dripsink");
    /// assert_eq!(topics.heartbeat(), "dripsink/heartbeat");
    /// ```
    pub fn heartbeat(&self) -> String {
        format!("{}{}heartbeat", self.root, DELIMITER)
    }

    /// Build a measurement topic: `<root>/<kind>/<source>/<metric>`.
    ///
    /// # Example
    /// ```
    /// use dripsink_common::topic::TopicBuilder;
    ///
    /// let topics = TopicBuilder::new("dripsink");
    /// let topic = topics.measurement("aranet", "kitchen", "temperature");
    /// assert_eq!(topic, "dripsink/aranet/kitchen/temperature");
    /// ```
    pub fn measurement(&self, kind: &str, source: &str, metric: &str) -> String {
        join([self.root.as_str(), kind, source, metric])
    }
}

/// Join topic segments with the delimiter.
pub fn join<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for segment in segments {
        if !out.is_empty() {
            out.push(DELIMITER);
        }
        out.push_str(segment);
    }
    out
}
