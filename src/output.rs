use std::io::Write;

use discovery::TargetGroup;

/// Writes every group as one JSON document per line.
pub fn write_groups<W: Write>(writer: &mut W, groups: &[TargetGroup]) -> std::io::Result<()> {
    for group in groups {
        serde_json::to_writer(&mut *writer, group)?;
        writer.write_all(b"\n")?;
    }

    writer.flush()
}
