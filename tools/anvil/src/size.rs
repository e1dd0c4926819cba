//! Section size report for a linked image.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Result, bail};

use crate::config::Toolchain;
use crate::tool_cmd::{ProcessRunner, ToolCommandBuilder};

/// Berkeley-format totals printed by the size tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSizes {
    /// `.text` bytes.
    pub text: String,
    /// `.data` bytes.
    pub data: String,
    /// `.bss` bytes.
    pub bss: String,
    /// Total, decimal.
    pub dec: String,
    /// Total, hexadecimal without prefix.
    pub hex: String,
}

/// Parse the last line of `size` output.
pub fn parse_size_output(output: &str) -> Result<SectionSizes> {
    let Some(line) = output.lines().rev().find(|l| !l.trim().is_empty()) else {
        bail!("size tool printed nothing");
    };
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        bail!("unexpected size output: {line}");
    }
    Ok(SectionSizes {
        text: fields[0].to_owned(),
        data: fields[1].to_owned(),
        bss: fields[2].to_owned(),
        dec: fields[3].to_owned(),
        hex: fields[4].to_owned(),
    })
}

/// Render the report, right-aligning every figure to the width of the total.
pub fn format_report(name: &str, sizes: &SectionSizes) -> String {
    let align = sizes.dec.len();
    let mut out = String::new();
    let _ = writeln!(out, "Statistics for {name}");
    let _ = writeln!(out, "  .text: {:>align$} bytes", sizes.text);
    let _ = writeln!(out, "  .data: {:>align$} bytes", sizes.data);
    let _ = writeln!(out, "  .bss:  {:>align$} bytes", sizes.bss);
    let _ = writeln!(out, "         {}", "=".repeat(align + 6));
    let _ = writeln!(out, "  TOTAL: {} bytes (0x{})", sizes.dec, sizes.hex);
    out
}

/// Run the size tool on `image` and print the report.
pub fn report_size(toolchain: &Toolchain, image: &Path) -> Result<()> {
    let cmd = ToolCommandBuilder::new(toolchain.tool("size")).path(image).build();
    let output = ProcessRunner.capture("size", &cmd)?;
    let sizes = parse_size_output(&output)?;
    let name = image
        .file_name()
        .map_or_else(|| image.display().to_string(), |n| n.to_string_lossy().into_owned());
    print!("{}", format_report(&name, &sizes));
    Ok(())
}
