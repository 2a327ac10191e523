//! Ordered header collection.
//!
//! Headers are kept as a sequence in insertion order, with a derived
//! lowercase-name index for lookups. Duplicate names are kept as separate
//! entries at their original positions and are never merged. No validation
//! happens here; the wire encoders decide what is legal.

use std::collections::HashMap;

/// A single header field. Name casing is kept as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Header fields in caller order plus a name-indexed projection.
#[derive(Debug, Clone, Default)]
pub struct OrderedHeaders {
    fields: Vec<HeaderField>,
    index: HashMap<String, Vec<usize>>,
}

impl OrderedHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.add(name, value);
        }
        headers
    }

    /// Append a field after every existing one.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let field = HeaderField::new(name, value);
        self.index
            .entry(field.name.to_ascii_lowercase())
            .or_default()
            .push(self.fields.len());
        self.fields.push(field);
        self
    }

    /// Replace every occurrence of `name` with a single field at the position
    /// of the first occurrence, or append if absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.fields.iter().position(|f| f.is(&name)) {
            Some(first) => {
                self.fields[first] = HeaderField::new(name.clone(), value);
                let mut seen = false;
                self.fields.retain(|f| {
                    if f.is(&name) {
                        let keep = !seen;
                        seen = true;
                        keep
                    } else {
                        true
                    }
                });
                self.reindex();
            }
            None => {
                self.add(name, value);
            }
        }
        self
    }

    /// Remove every occurrence of `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| !f.is(name));
        let removed = before - self.fields.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }

    /// Keep only fields matching the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&HeaderField) -> bool) {
        self.fields.retain(|f| keep(f));
        self.reindex();
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .and_then(|positions| positions.first())
            .map(|&i| self.fields[i].value.as_str())
    }

    /// All values for `name`, in wire order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|positions| {
                positions
                    .iter()
                    .map(|&i| self.fields[i].value.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, HeaderField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Distinct lowercase names, in order of first appearance.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<(usize, &str)> = self
            .index
            .iter()
            .filter_map(|(name, positions)| positions.first().map(|&p| (p, name.as_str())))
            .collect();
        names.sort_by_key(|(p, _)| *p);
        names.into_iter().map(|(_, n)| n).collect()
    }

    /// Lossy conversion into a conventional header map. Fields that are not
    /// legal `http` names or values are skipped.
    pub fn to_header_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::with_capacity(self.fields.len());
        for field in &self.fields {
            let name = http::header::HeaderName::from_bytes(field.name.as_bytes());
            let value = http::header::HeaderValue::from_str(&field.value);
            if let (Ok(name), Ok(value)) = (name, value) {
                map.append(name, value);
            }
        }
        map
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, field) in self.fields.iter().enumerate() {
            self.index
                .entry(field.name.to_ascii_lowercase())
                .or_default()
                .push(i);
        }
    }
}

impl<'a> IntoIterator for &'a OrderedHeaders {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for OrderedHeaders {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self::from_pairs(iter)
    }
}

/// RFC 9110 token characters, the legal alphabet of a field name.
pub fn valid_field_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                        | b'`' | b'|' | b'~'
                )
        })
}

/// Field values may hold any byte except controls other than HTAB.
pub fn valid_field_value(value: &str) -> bool {
    value.bytes().all(|b| (b >= b' ' && b != 0x7f) || b == b'\t')
}

/// Bytes that would break HTTP/1 framing whatever the configuration.
pub(crate) fn breaks_framing(s: &str) -> bool {
    s.bytes().any(|b| matches!(b, b'\r' | b'\n' | 0))
}
