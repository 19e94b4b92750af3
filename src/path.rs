//! Derivation paths in `m/44'/0'/0'/0/1` notation

use core::fmt;

use crate::{errors::Error, ChildIndex};

/// Derivation path like `m/44'/0'/0'/0/1`
///
/// Grammar is `m(/index['])*`: literal `m` (case-insensitive) followed by child indexes,
/// each being a decimal number below $2^{31}$ optionally marked as hardened with `'`.
/// Whitespace and separators at both ends are ignored.
///
/// ```rust
/// use hd_keytree::{ChildIndex, DerivationPath};
///
/// let path: DerivationPath = "m/0'/1/2'".parse()?;
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.to_string(), "m/0'/1/2'");
/// assert_eq!(path.iter().next(), Some(ChildIndex::new(0, true)?));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath {
    indexes: Vec<ChildIndex>,
}

impl DerivationPath {
    /// Path `m` pointing at the key itself
    pub fn master() -> Self {
        Self::default()
    }

    /// Number of derivation steps
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    /// Whether path is `m`
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Iterates over child indexes, from the top of the tree down
    pub fn iter(&self) -> impl Iterator<Item = ChildIndex> + '_ {
        self.indexes.iter().copied()
    }

    /// Returns the path extended by one more child
    pub fn child(&self, index: impl Into<ChildIndex>) -> Self {
        let mut indexes = self.indexes.clone();
        indexes.push(index.into());
        Self { indexes }
    }
}

impl core::str::FromStr for DerivationPath {
    type Err = Error;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let mut segments = path.trim().trim_matches('/').split('/');

        match segments.next() {
            Some(m) if m.eq_ignore_ascii_case("m") => (),
            _ => return Err(Error::malformed_path(path, "path must start with `m`")),
        }

        let indexes = segments
            .map(|segment| parse_segment(segment).map_err(|reason| Error::malformed_path(path, reason)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { indexes })
    }
}

/// Parses `index` or `index'`
pub(crate) fn parse_segment(segment: &str) -> Result<ChildIndex, &'static str> {
    let (digits, hardened) = match segment.strip_suffix('\'') {
        Some(digits) => (digits, true),
        None => (segment, false),
    };
    if digits.is_empty() {
        return Err("empty child index");
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("child index must be a non-negative decimal number");
    }
    let index = digits
        .parse::<u32>()
        .map_err(|_| "child index is too large")?;
    ChildIndex::new(index, hardened).map_err(|_| "child index is too large")
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.indexes {
            write!(f, "/{index}")?;
        }
        Ok(())
    }
}

impl FromIterator<ChildIndex> for DerivationPath {
    fn from_iter<T: IntoIterator<Item = ChildIndex>>(iter: T) -> Self {
        Self {
            indexes: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DerivationPath {
    type Item = ChildIndex;
    type IntoIter = core::iter::Copied<core::slice::Iter<'a, ChildIndex>>;

    fn into_iter(self) -> Self::IntoIter {
        self.indexes.iter().copied()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for DerivationPath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for DerivationPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let path = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        path.parse().map_err(serde::de::Error::custom)
    }
}
