//! CLI output formatting.
//!
//! After a successful run the binary prints a short summary to stdout:
//!
//! ```text
//! photo.jpg → small.jpg (JPEG)
//!     Primary: 4000x3000 → 2000x1500
//!     Gain map: 1000x750 → 1000x750, 1000 bytes/row
//!     Quality: 85
//!     Preview: gm.jpg
//! ```
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::pipeline::ResizeReport;
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// File name of `path`, or the whole path when it has none.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn dims((w, h): (u32, u32)) -> String {
    format!("{w}x{h}")
}

/// Format the summary of one resize run.
pub fn format_report(report: &ResizeReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{} → {} ({})",
        display_name(&report.input),
        display_name(&report.output),
        report.format.name()
    )];
    lines.push(format!(
        "{}Primary: {} → {}",
        indent(1),
        dims(report.source_size),
        dims(report.output_size)
    ));

    let gm = report.gain_map;
    let padding = gm.row_stride - gm.width as usize;
    let stride = if padding > 0 {
        format!("{} bytes/row ({padding} padding)", gm.row_stride)
    } else {
        format!("{} bytes/row", gm.row_stride)
    };
    lines.push(format!(
        "{}Gain map: {} → {}, {stride}",
        indent(1),
        dims(report.source_gain_map_size),
        dims((gm.width, gm.height))
    ));
    lines.push(format!("{}Quality: {}", indent(1), report.quality.value()));
    if let Some(preview) = &report.gain_map_preview {
        lines.push(format!("{}Preview: {}", indent(1), display_name(preview)));
    }
    lines
}

pub fn print_report(report: &ResizeReport) {
    for line in format_report(report) {
        println!("{}", line);
    }
}
