//! Parsers for the cgroup v2 stat files the counter reader consumes.

mod cpu;
mod error;
mod memory;
mod parser;

pub use cpu::CpuStat;
pub use error::StatParseError;
pub use memory::MemoryStat;
pub use parser::{KeyValueStat, parse_single_value};
