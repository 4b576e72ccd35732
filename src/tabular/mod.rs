//! Tabular input: delimited text files parsed into headers and rows.

mod parser;

pub use parser::{parse_separator, parse_table, read_table};
