use std::fmt::Display;

/// Ordered key/value record of what a learner observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    name: String,
    entries: Vec<(String, String)>,
}

impl Report {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Display) {
        self.entries.push((key.into(), value.to_string()));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First value recorded under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.entries {
            write!(f, "\n  {key}: {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_entries() {
        let report = Report::new("timing")
            .with("threshold", 12.5)
            .with("inverted", false)
            .with("threshold", 1);

        assert_eq!(report.name(), "timing");
        assert_eq!(report.get("threshold"), Some("12.5"));
        assert_eq!(report.get("missing"), None);
        assert_eq!(report.entries().len(), 3);
        assert_eq!(report.to_string(), "timing\n  threshold: 12.5\n  inverted: false\n  threshold: 1");
    }
}
