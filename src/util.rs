use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use sha1::{Digest, Sha1};

pub fn local_timestamp_string() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha1_hex(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Renders a score the way REDCap stores it: integral values without a
/// fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

pub fn escape_csv_cell(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn csv_line<S: AsRef<str>>(cells: &[S]) -> String {
    cells
        .iter()
        .map(|cell| escape_csv_cell(cell.as_ref()))
        .collect::<Vec<String>>()
        .join(",")
}

pub fn write_csv<W: Write, S: AsRef<str>>(
    output: &mut W,
    header: &[&str],
    rows: &[Vec<S>],
) -> io::Result<()> {
    writeln!(output, "{}", csv_line(header))?;
    for row in rows {
        writeln!(output, "{}", csv_line(row))?;
    }
    Ok(())
}

pub fn write_csv_file<S: AsRef<str>>(path: &Path, header: &[&str], rows: &[Vec<S>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let file = File::create(path)
        .with_context(|| format!("failed to create csv file: {}", path.display()))?;
    let mut output = BufWriter::new(file);
    write_csv(&mut output, header, rows)
        .with_context(|| format!("failed to write csv file: {}", path.display()))?;
    output
        .flush()
        .with_context(|| format!("failed to finalize csv file: {}", path.display()))?;
    Ok(())
}

/// Writes one compact JSON object per line.
pub fn write_json_lines<W: Write, T: Serialize>(output: &mut W, values: &[T]) -> Result<()> {
    for value in values {
        serde_json::to_writer(&mut *output, value).context("failed to serialize json line")?;
        writeln!(output)?;
    }
    output.flush()?;
    Ok(())
}
