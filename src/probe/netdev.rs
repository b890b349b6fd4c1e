use std::collections::BTreeMap;
use std::io::BufRead;

use super::ParseError;

/// Per-interface network counters keyed `<iface>.<counter>`, e.g. `eth0.rx_bytes`.
pub type NetworkCounters = BTreeMap<String, u64>;

/// Number of counter columns on every interface line of `/proc/net/dev`.
const FIELD_COUNT: usize = 16;

/// Counter columns reported for each interface, by position after the `:`.
const REPORTED_FIELDS: [(usize, &str); 8] = [
    (0, "rx_bytes"),
    (1, "rx_packets"),
    (2, "rx_errs"),
    (3, "rx_drop"),
    (8, "tx_bytes"),
    (9, "tx_packets"),
    (10, "tx_errs"),
    (11, "tx_drop"),
];

const IGNORED_INTERFACES: [&str; 1] = ["lo"];

fn is_ignored_interface(iface: &str) -> bool {
    IGNORED_INTERFACES.contains(&iface)
}

/// Parses the output of `cat /proc/net/dev` run inside a container's network namespace.
///
/// The first two lines are the column headers; every following non-empty line must
/// look like `<iface>: <16 counters>`. The loopback interface is skipped.
///
/// # Errors
///
/// Any malformed line rejects the whole table with a [`ParseError`].
pub fn from_reader<R: BufRead>(buf: &mut R) -> Result<NetworkCounters, ParseError> {
    let mut counters = NetworkCounters::new();
    let mut line = String::new();

    for _ in 0..2 {
        line.clear();
        if buf.read_line(&mut line)? == 0 || !line.contains('|') {
            return Err(ParseError::MissingHeader);
        }
    }

    let mut lineno = 2;
    loop {
        line.clear();
        if buf.read_line(&mut line)? == 0 {
            break;
        }
        lineno += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (iface, data) = trimmed
            .split_once(':')
            .ok_or(ParseError::MissingSeparator { line: lineno })?;
        let iface = iface.trim();
        if is_ignored_interface(iface) {
            continue;
        }

        let fields: Vec<&str> = data.split_whitespace().collect();
        if fields.len() < FIELD_COUNT {
            return Err(ParseError::TooFewFields {
                iface: iface.to_owned(),
                line: lineno,
                found: fields.len(),
            });
        }

        for (pos, name) in REPORTED_FIELDS {
            let value = fields[pos]
                .parse::<u64>()
                .map_err(|source| ParseError::InvalidValue {
                    iface: iface.to_owned(),
                    value: fields[pos].to_owned(),
                    line: lineno,
                    source,
                })?;
            counters.insert(format!("{iface}.{name}"), value);
        }
    }

    Ok(counters)
}
