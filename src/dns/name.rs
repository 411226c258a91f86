use std::fmt;

/// A fully qualified domain name stored in presentation form with a trailing
/// dot. Comparisons and wire output use the canonical (lowercase) form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Name(String);

impl Name {
    /// Build a name from presentation form, appending the trailing dot if
    /// missing and lowercasing to canonical form.
    pub fn canonical(s: &str) -> Self {
        let mut name = s.to_ascii_lowercase();
        if !name.ends_with('.') {
            name.push('.');
        }
        Name(name)
    }

    /// Build a name from parsed wire labels.
    pub fn from_labels(labels: &[String]) -> Self {
        let mut name = String::new();
        for label in labels {
            if label.is_empty() {
                continue;
            }
            name.push_str(&label.to_ascii_lowercase());
            name.push('.');
        }
        if name.is_empty() {
            name.push('.');
        }
        Name(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Labels in presentation order, excluding the root.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('.').filter(|l| !l.is_empty())
    }

    /// Label count excluding the root.
    pub fn label_count(&self) -> usize {
        self.labels().count()
    }

    /// Number of trailing labels shared with `zone`.
    pub fn common_suffix_labels(&self, zone: &Name) -> usize {
        self.labels()
            .rev()
            .zip(zone.labels().rev())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Uncompressed wire form: length-prefixed labels plus the root byte.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() + 1);
        for label in self.labels() {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
        buf
    }
}

impl Default for Name {
    fn default() -> Self {
        Name(String::from("."))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
