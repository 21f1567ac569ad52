use serde_json::Value;

use crate::model::matching::{get_path, remove_path, set_path};

/// How a path appears in a select spec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    /// `name`
    Include,
    /// `-name`
    Exclude,
    /// `+name`: re-include a path the schema hides
    Force,
}

/// A parsed field projection such as `name -secret +hidden`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<(String, Inclusion)>,
}

impl Projection {
    /// Parse a whitespace- or comma-separated select spec
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        let mut projection = Self::default();
        for token in spec.split(|c: char| c.is_whitespace() || c == ',').filter(|t| !t.is_empty()) {
            let (path, inclusion) = if let Some(path) = token.strip_prefix('-') {
                (path, Inclusion::Exclude)
            } else if let Some(path) = token.strip_prefix('+') {
                (path, Inclusion::Force)
            } else {
                (token, Inclusion::Include)
            };
            if !path.is_empty() {
                projection.set(path, inclusion);
            }
        }
        projection
    }

    /// A projection forcing every path in `paths` back in
    #[must_use]
    pub fn forcing<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut projection = Self::default();
        for path in paths {
            projection.set(path.as_ref(), Inclusion::Force);
        }
        projection
    }

    fn set(&mut self, path: &str, inclusion: Inclusion) {
        if let Some(slot) = self.fields.iter_mut().find(|(p, _)| p == path) {
            slot.1 = inclusion;
        } else {
            self.fields.push((path.to_string(), inclusion));
        }
    }

    /// Layer `other` on top of this projection; later entries win
    pub fn merge(&mut self, other: &Self) {
        for (path, inclusion) in &other.fields {
            self.set(path, *inclusion);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Inclusion)> {
        self.fields.iter().map(|(p, i)| (p.as_str(), *i))
    }

    /// Paths listed with the given inclusion
    pub fn paths(&self, inclusion: Inclusion) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(move |(_, i)| *i == inclusion)
            .map(|(p, _)| p.as_str())
    }

    /// Apply the projection to a document.
    ///
    /// `id_key` stays unless excluded explicitly. `hidden` are the schema's deselected
    /// paths, dropped unless the projection includes or forces them.
    #[must_use]
    pub fn apply(&self, doc: &Value, id_key: &str, hidden: &[String]) -> Value {
        let included: Vec<&str> = self.paths(Inclusion::Include).collect();
        let mut out = if included.is_empty() {
            let mut out = doc.clone();
            for path in hidden {
                if !self.fields.iter().any(|(p, i)| p == path && *i != Inclusion::Exclude) {
                    remove_path(&mut out, path);
                }
            }
            for path in self.paths(Inclusion::Exclude) {
                remove_path(&mut out, path);
            }
            out
        } else {
            let mut out = Value::Object(serde_json::Map::new());
            let keep_id = !self.fields.iter().any(|(p, i)| p == id_key && *i == Inclusion::Exclude);
            let forced = self.paths(Inclusion::Force);
            let wanted = included.iter().copied().chain(forced);
            for path in wanted.chain(keep_id.then_some(id_key)) {
                if let Some(value) = get_path(doc, path) {
                    set_path(&mut out, path, value.clone());
                }
            }
            for path in self.paths(Inclusion::Exclude) {
                remove_path(&mut out, path);
            }
            out
        };
        if out.is_null() {
            out = Value::Object(serde_json::Map::new());
        }
        out
    }
}
