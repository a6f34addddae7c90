//! Ordered list of member names.  Used both as operation input and as the
//! result of a listing.  Duplicates are kept.

use std::slice;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileList {
    entries: Vec<String>,
}

impl FileList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<S: Into<String>>(&mut self, path: S) {
        self.entries.push(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|e| e == path)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, String> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }
}

impl<S: Into<String>> FromIterator<S> for FileList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self { entries: iter.into_iter().map(Into::into).collect() }
    }
}

impl<S: Into<String>> Extend<S> for FileList {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.entries.extend(iter.into_iter().map(Into::into));
    }
}

impl<'a> IntoIterator for &'a FileList {
    type Item = &'a String;
    type IntoIter = slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for FileList {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
