//! Directory enumeration.
//!
//! [`enumerate_directory`] drives a callback once per entry and lets the
//! callback decide whether to keep going. [`read_directory`] and
//! [`glob_directory`] drain that callback into a [`DirectoryListing`] before
//! handing anything back, so iterating a listing never touches the
//! filesystem and calling them again simply re-reads the directory.

use std::path::Path;

use walkdir::WalkDir;

use super::error::{record, Error, Result};
use crate::logging::trace;

/// What the enumeration callback wants to happen next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnumerationResult {
    /// Deliver the next entry.
    Continue,
    /// Stop now; the enumeration succeeded.
    Success,
    /// Stop now; the enumeration failed.
    Failure,
}

/// Call `callback(dir, name)` for each entry of `dir`, in name order.
///
/// Returns `Ok` when every entry was visited or the callback stopped with
/// [`EnumerationResult::Success`], and
/// [`Error::EnumerationFailed`] when it stopped with
/// [`EnumerationResult::Failure`].
pub fn enumerate_directory<P, F>(dir: P, mut callback: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&Path, &str) -> EnumerationResult,
{
    let dir = dir.as_ref();
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(record)? {
        let entry = entry.map_err(record)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort_unstable();
    trace!(dir = %dir.display(), entries = names.len(), "enumerating directory");

    for name in &names {
        match callback(dir, name) {
            EnumerationResult::Continue => {}
            EnumerationResult::Success => return Ok(()),
            EnumerationResult::Failure => {
                return Err(record(Error::EnumerationFailed(format!(
                    "stopped at `{}` in {}",
                    name,
                    dir.display()
                ))));
            }
        }
    }
    Ok(())
}

/// Ordered, fully materialized directory contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    entries: Vec<String>,
}

impl DirectoryListing {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.entries.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e == name)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<String> {
        self.entries
    }
}

impl IntoIterator for DirectoryListing {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a DirectoryListing {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Entry names of `dir`, sorted.
pub fn read_directory<P: AsRef<Path>>(dir: P) -> Result<DirectoryListing> {
    let mut entries = Vec::new();
    enumerate_directory(dir, |_, name| {
        entries.push(name.to_string());
        EnumerationResult::Continue
    })?;
    Ok(DirectoryListing { entries })
}

/// Options for [`glob_directory`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobFlags {
    pub case_insensitive: bool,
}

impl GlobFlags {
    pub const NONE: Self = Self {
        case_insensitive: false,
    };
    pub const CASE_INSENSITIVE: Self = Self {
        case_insensitive: true,
    };
}

/// Every path under `root` (recursively) whose `/`-separated path relative
/// to `root` matches `pattern`. A `None` pattern matches everything.
///
/// `*` matches any run of characters within one path component and `?`
/// matches exactly one; neither matches `/`.
///
/// # Examples
/// ```no_run
/// use embeddenator_aio::{glob_directory, GlobFlags};
///
/// for path in glob_directory("assets", Some("textures/*.png"), GlobFlags::NONE).unwrap() {
///     println!("{path}");
/// }
/// ```
pub fn glob_directory<P: AsRef<Path>>(
    root: P,
    pattern: Option<&str>,
    flags: GlobFlags,
) -> Result<DirectoryListing> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(record(Error::NotFound(root.to_path_buf())));
    }
    let pattern = pattern.map(|p| fold_case(p, flags));

    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));
    for entry in walker {
        let entry = entry.map_err(|e| record(Error::EnumerationFailed(e.to_string())))?;
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let matched = match &pattern {
            Some(p) => glob_match(p, &fold_case(&relative, flags)),
            None => true,
        };
        if matched {
            entries.push(relative);
        }
    }
    Ok(DirectoryListing { entries })
}

fn fold_case(s: &str, flags: GlobFlags) -> String {
    if flags.case_insensitive {
        s.to_lowercase()
    } else {
        s.to_string()
    }
}

/// Match `path` against `pattern` one `/`-separated component at a time.
pub(crate) fn glob_match(pattern: &str, path: &str) -> bool {
    let mut pattern = pattern.split('/');
    let mut path = path.split('/');
    loop {
        match (pattern.next(), path.next()) {
            (Some(p), Some(s)) if component_match(p, s) => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn component_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
