//! Broker topic-filter matching.
//!
//! The federation namespace only uses two filter shapes: exact topics and
//! subtree filters with a trailing `/#`. A bare `#` matches everything.
//! Levels are `/`-separated; a subtree filter matches its own prefix topic
//! as well as anything below it.

/// Returns true when `filter` matches `topic`.
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    if filter == "#" {
        return true;
    }

    match filter.strip_suffix("/#") {
        Some(prefix) => {
            topic == prefix
                || topic
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        }
        None => filter == topic,
    }
}

/// An immutable set of filters attached to one subscription.
#[derive(Debug, Clone)]
pub struct FilterSet {
    filters: Vec<String>,
}

impl FilterSet {
    #[must_use]
    pub fn new(filters: Vec<String>) -> Self {
        Self { filters }
    }

    /// True when any filter in the set matches `topic`.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        self.filters.iter().any(|f| matches(f, topic))
    }
}
