//! Small value types shared by streams, the async engine and storage.

use std::fmt;

use super::error::{Error, Result};

/// Classification attached to a single read, write or flush call.
///
/// This is an out-value of the call that produced it. It says nothing about
/// whether the stream itself is still open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// Everything is fine.
    #[default]
    Ready,
    /// The backing resource reported a failure.
    Error,
    /// End of data was reached.
    Eof,
    /// No data is available right now; try again later.
    NotReady,
    /// The resource cannot be written.
    ReadOnly,
    /// The resource cannot be read.
    WriteOnly,
}

impl StreamStatus {
    /// `true` for every status that ends a transfer early.
    pub fn is_terminal(self) -> bool {
        !matches!(self, StreamStatus::Ready)
    }
}

/// Seek origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    /// Resolve `offset` relative to this origin, given the current position
    /// and total length. Returns `None` when the result would be negative.
    pub fn resolve(self, offset: i64, position: u64, length: u64) -> Option<u64> {
        let base = match self {
            Whence::Set => 0i64,
            Whence::Current => i64::try_from(position).ok()?,
            Whence::End => i64::try_from(length).ok()?,
        };
        let target = base.checked_add(offset)?;
        u64::try_from(target).ok()
    }
}

/// fopen-style access mode for file-backed streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl FileMode {
    /// Parse `r`, `w`, `a`, `r+`, `w+` or `a+`, optionally with a `b` flag
    /// anywhere after the first character.
    ///
    /// # Examples
    /// ```
    /// use embeddenator_aio::FileMode;
    ///
    /// let mode = FileMode::parse("r+b").unwrap();
    /// assert!(mode.read && mode.write && !mode.truncate);
    /// assert!(FileMode::parse("x").is_err());
    /// ```
    pub fn parse(mode: &str) -> Result<Self> {
        let mut chars = mode.chars();
        let primary = chars.next().ok_or_else(|| Error::InvalidMode(mode.to_string()))?;
        let mut plus = false;
        for c in chars {
            match c {
                '+' if !plus => plus = true,
                'b' => {}
                _ => return Err(Error::InvalidMode(mode.to_string())),
            }
        }

        let parsed = match primary {
            'r' => FileMode {
                read: true,
                write: plus,
                append: false,
                create: false,
                truncate: false,
            },
            'w' => FileMode {
                read: plus,
                write: true,
                append: false,
                create: true,
                truncate: true,
            },
            'a' => FileMode {
                read: plus,
                write: true,
                append: true,
                create: true,
                truncate: false,
            },
            _ => return Err(Error::InvalidMode(mode.to_string())),
        };
        Ok(parsed)
    }

    pub(crate) fn open_options(self) -> std::fs::OpenOptions {
        let mut opts = std::fs::OpenOptions::new();
        opts.read(self.read)
            .write(self.write && !self.append)
            .append(self.append)
            .create(self.create)
            .truncate(self.truncate);
        opts
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let primary = if self.append {
            'a'
        } else if self.truncate {
            'w'
        } else {
            'r'
        };
        let plus = match primary {
            'r' => self.write,
            _ => self.read,
        };
        write!(f, "{}{}", primary, if plus { "+" } else { "" })
    }
}

/// Kind of filesystem object a path refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PathType {
    None,
    File,
    Directory,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        let r = FileMode::parse("r").unwrap();
        assert!(r.read && !r.write);

        let w = FileMode::parse("wb").unwrap();
        assert!(w.write && w.create && w.truncate && !w.read);

        let a = FileMode::parse("a+").unwrap();
        assert!(a.append && a.read && a.write && !a.truncate);

        assert!(FileMode::parse("").is_err());
        assert!(FileMode::parse("r++").is_err());
        assert!(FileMode::parse("q").is_err());
    }

    #[test]
    fn test_mode_display() {
        for mode in ["r", "w", "a", "r+", "w+", "a+"] {
            assert_eq!(FileMode::parse(mode).unwrap().to_string(), mode);
        }
    }

    #[test]
    fn test_whence_resolve() {
        assert_eq!(Whence::Set.resolve(5, 2, 10), Some(5));
        assert_eq!(Whence::Current.resolve(-1, 2, 10), Some(1));
        assert_eq!(Whence::End.resolve(-10, 2, 10), Some(0));
        assert_eq!(Whence::End.resolve(-11, 2, 10), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!StreamStatus::Ready.is_terminal());
        assert!(StreamStatus::Eof.is_terminal());
        assert!(StreamStatus::NotReady.is_terminal());
    }
}
