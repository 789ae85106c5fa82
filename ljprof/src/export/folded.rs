//! Folded stack output (`comm;frame;frame count`), the input format of
//! `flamegraph.pl` and inferno.

use std::collections::BTreeMap;
use std::io::Write;

use super::SampleRecord;
use crate::domain::ExportError;

const LUA_PREFIX: &str = "[lua] ";

/// Stack part of a folded line: comm, native frames, Lua frames, kernel frames.
#[must_use]
pub fn fold_line(record: &SampleRecord) -> String {
    let comm = if record.comm.is_empty() { "?" } else { record.comm.as_str() };
    let mut parts = vec![sanitize(comm)];
    parts.extend(record.native.iter().map(|f| sanitize(f)));
    parts.extend(record.lua.iter().map(|f| format!("{LUA_PREFIX}{}", sanitize(f))));
    parts.extend(record.kernel.iter().map(|f| sanitize(f)));
    parts.join(";")
}

/// Writes one line per distinct stack, summing records that fold to the
/// same text. Lines are sorted for stable output.
///
/// # Errors
/// Returns an error if writing fails
pub fn write_folded<W: Write>(writer: &mut W, records: &[SampleRecord]) -> Result<(), ExportError> {
    let mut lines: BTreeMap<String, u64> = BTreeMap::new();
    for record in records.iter().filter(|r| r.count > 0) {
        *lines.entry(fold_line(record)).or_default() += record.count;
    }
    for (stack, count) in &lines {
        writeln!(writer, "{stack} {count}")?;
    }
    writer.flush()?;
    Ok(())
}

/// `;` separates frames and a newline ends the record
fn sanitize(frame: &str) -> String {
    frame.replace([';', '\n', '\r'], "_")
}
