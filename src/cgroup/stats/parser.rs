//! Generic parsing for the flat `key value` stat files of the cgroup v2 hierarchy,
//! such as `cpu.stat` and `memory.stat`, and for single-value files such as
//! `memory.current`.
//!
//! # Example: Implementing `KeyValueStat`
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::LazyLock;
//! use container_metrics::cgroup::stats::KeyValueStat;
//!
//! #[derive(Default)]
//! struct MyStat {
//!     foo: u64,
//! }
//!
//! static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut MyStat, u64)>> =
//!     LazyLock::new(|| {
//!         let mut map: HashMap<&'static str, fn(&mut MyStat, u64)> = HashMap::new();
//!         map.insert("foo", |s, v| s.foo = v);
//!         map
//!     });
//!
//! impl KeyValueStat for MyStat {
//!     fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
//!         &HANDLERS
//!     }
//! }
//!
//! let stat = MyStat::from_reader(&mut "foo 7\nbar 9\n".as_bytes()).unwrap();
//! assert_eq!(stat.foo, 7);
//! ```

use std::collections::{HashMap, HashSet};
use std::io::BufRead;

use super::StatParseError;

/// A stat file made of one whitespace separated `key value` pair per line.
///
/// Implementors list the keys they care about in [`KeyValueStat::field_handlers`];
/// every other key is skipped. Parsing stops early once every known key was seen.
pub trait KeyValueStat: Default
where
    Self: 'static,
{
    /// If `false`, a key seen twice is reported as [`StatParseError::DuplicateField`].
    const ALLOW_DUPLICATE_KEYS: bool = false;

    /// Known field names mapped to the setter that stores the parsed value.
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses a stat file from `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::InvalidKeyValue`] if a known key carries a non-numeric
    /// value, [`StatParseError::DuplicateField`] for a repeated key and
    /// [`StatParseError::Io`] if reading fails.
    fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut stat = Self::default();
        let handlers = Self::field_handlers();
        let mut seen_keys = HashSet::with_capacity(handlers.len());

        let mut line = String::new();
        let mut lineno = 0;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            let mut parts = line.split_whitespace();
            if let (Some(key), Some(val)) = (parts.next(), parts.next()) {
                if let Some((k, handler)) = handlers.get_key_value(key) {
                    let parsed =
                        val.parse::<u64>()
                            .map_err(|source| StatParseError::InvalidKeyValue {
                                key: key.to_owned(),
                                value: val.to_owned(),
                                line: lineno,
                                source,
                            })?;
                    if !Self::ALLOW_DUPLICATE_KEYS && !seen_keys.insert(*k) {
                        return Err(StatParseError::DuplicateField {
                            field: key.to_owned(),
                            line: lineno,
                        });
                    }
                    handler(&mut stat, parsed);
                }
            }
            if !Self::ALLOW_DUPLICATE_KEYS && seen_keys.len() == handlers.len() {
                break;
            }
            line.clear();
        }

        Ok(stat)
    }
}

/// Parses a file holding a single unsigned integer, like `memory.current`.
///
/// # Errors
///
/// Returns [`StatParseError::InvalidValue`] if the first line is not a number.
pub fn parse_single_value<R: BufRead>(buf: &mut R) -> Result<u64, StatParseError> {
    let mut line = String::new();
    buf.read_line(&mut line)?;
    let line = line.trim();
    line.parse::<u64>()
        .map_err(|source| StatParseError::InvalidValue {
            value: line.to_owned(),
            line: 1,
            source,
        })
}
