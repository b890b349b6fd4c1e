//! Memory accounting from the cgroup v2 `memory.stat` file.
//!
//! `memory.current` and `memory.peak` hold a single number and are read with
//! [`super::parse_single_value`].

use std::collections::HashMap;
use std::sync::LazyLock;

use super::KeyValueStat;

/// The `memory.stat` fields the agent reports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryStat {
    /// Anonymous memory, the resident set of the cgroup's processes.
    pub anon: u64,
}

impl MemoryStat {
    fn set_anon(&mut self, v: u64) {
        self.anon = v;
    }
}

type Setter = fn(&mut MemoryStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(1);
    m.insert("anon", MemoryStat::set_anon);
    m
});

impl KeyValueStat for MemoryStat {
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
        &SETTERS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::stats::StatParseError;

    #[test]
    fn test_parse_memory_stat() {
        let data = "\
file 2000
anon 1000
kernel_stack 300
";
        let stat = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.anon, 1000);
    }

    #[test]
    fn test_extra_whitespace() {
        let data = "    anon     1000\n";
        let stat = MemoryStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(stat.anon, 1000);
    }

    #[test]
    fn test_parse_invalid_memory_stat() {
        let data = "anon abc\n";
        assert!(matches!(
            MemoryStat::from_reader(&mut data.as_bytes()),
            Err(StatParseError::InvalidKeyValue { line: 1, .. })
        ));
    }
}
