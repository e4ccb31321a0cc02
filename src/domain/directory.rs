//! Spreadsheet-backed location directory.
//!
//! The workbook carries two sheets: `Hardware list` maps a location to the
//! device address we probe, `Port assignment` maps a location to the switch
//! that powers it and the port to cycle. Rows with missing required cells
//! are dropped, never surfaced as partial records. The loaded directory is a
//! snapshot — one load per batch run, read-only afterwards.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const HARDWARE_SHEET: &str = "Hardware list";
pub const ASSIGNMENT_SHEET: &str = "Port assignment";

/// A probe-able location from the hardware sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRecord {
    pub location: String,
    pub address: String,
}

/// Switch coordinates for one location from the port-assignment sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAssignment {
    pub switch_address: String,
    pub port: String,
}

pub struct Directory {
    records: Vec<LocationRecord>,
    assignments: HashMap<String, PortAssignment>,
}

impl Directory {
    pub fn load(path: &Path) -> Result<Self> {
        let mut workbook: Xlsx<_> =
            open_workbook(path).with_context(|| format!("opening {}", path.display()))?;

        let hardware = workbook
            .worksheet_range(HARDWARE_SHEET)
            .with_context(|| format!("reading sheet '{HARDWARE_SHEET}'"))?;
        let assignment = workbook
            .worksheet_range(ASSIGNMENT_SHEET)
            .with_context(|| format!("reading sheet '{ASSIGNMENT_SHEET}'"))?;

        let hardware_rows = sheet_rows(&hardware, &["Location", "IP"])
            .with_context(|| format!("sheet '{HARDWARE_SHEET}'"))?;
        let assignment_rows = sheet_rows(&assignment, &["Location", "IP", "Switch port"])
            .with_context(|| format!("sheet '{ASSIGNMENT_SHEET}'"))?;

        Ok(Self::build(hardware_rows, assignment_rows))
    }

    /// Assemble a directory from raw cell text, applying address extraction,
    /// port normalization, and the drop-partial-rows policy.
    pub fn build(
        hardware_rows: Vec<Vec<Option<String>>>,
        assignment_rows: Vec<Vec<Option<String>>>,
    ) -> Self {
        let mut records = Vec::new();
        for row in hardware_rows {
            let (Some(location), Some(ip_cell)) = (cell(&row, 0), cell(&row, 1)) else {
                continue;
            };
            let Some(address) = extract_ipv4(&ip_cell) else {
                warn!(location = %location, cell = %ip_cell, "no valid IPv4 in address cell, row dropped");
                continue;
            };
            records.push(LocationRecord { location, address });
        }

        let mut assignments = HashMap::new();
        for row in assignment_rows {
            let (Some(location), Some(ip_cell), Some(port_cell)) =
                (cell(&row, 0), cell(&row, 1), cell(&row, 2))
            else {
                continue;
            };
            let Some(switch_address) = extract_ipv4(&ip_cell) else {
                warn!(location = %location, cell = %ip_cell, "no valid IPv4 in switch cell, row dropped");
                continue;
            };
            let Some(port) = normalize_port(&port_cell) else {
                warn!(location = %location, cell = %port_cell, "unusable port descriptor, row dropped");
                continue;
            };
            assignments.insert(
                location,
                PortAssignment {
                    switch_address,
                    port,
                },
            );
        }

        Self {
            records,
            assignments,
        }
    }

    pub fn records(&self) -> &[LocationRecord] {
        &self.records
    }

    pub fn assignment(&self, location: &str) -> Option<&PortAssignment> {
        self.assignments.get(location)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Extract the rows of required columns from a sheet, keyed by header name.
///
/// Fails only when a required column header is absent entirely; sparse cells
/// come back as `None` and are filtered row-by-row later.
fn sheet_rows(
    range: &calamine::Range<Data>,
    columns: &[&str],
) -> Result<Vec<Vec<Option<String>>>> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        bail!("sheet is empty");
    };

    let mut indices = Vec::with_capacity(columns.len());
    for name in columns {
        let index = header
            .iter()
            .position(|c| cell_text(c).as_deref() == Some(*name));
        match index {
            Some(i) => indices.push(i),
            None => bail!("required column '{name}' not found"),
        }
    }

    Ok(rows
        .map(|row| {
            indices
                .iter()
                .map(|&i| row.get(i).and_then(cell_text))
                .collect()
        })
        .collect())
}

fn cell_text(data: &Data) -> Option<String> {
    let text = match data {
        Data::String(s) => s.trim().to_string(),
        // Numeric cells: pandas-style sheets store port numbers as floats.
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn cell(row: &[Option<String>], index: usize) -> Option<String> {
    row.get(index).cloned().flatten()
}

/// Find the first well-formed dotted-quad IPv4 token in possibly noisy text.
///
/// Scans maximal digit/dot runs and validates each with the std parser, so
/// octet range checks (0–255) come for free. No valid token means `None` —
/// never a best-guess.
pub fn extract_ipv4(text: &str) -> Option<String> {
    let mut run = String::new();
    let mut chars = text.chars().chain(std::iter::once(' '));

    loop {
        let c = chars.next()?;
        if c.is_ascii_digit() || c == '.' {
            run.push(c);
            continue;
        }
        if !run.is_empty() {
            let candidate = run.trim_matches('.');
            if candidate.split('.').count() == 4 {
                if let Ok(addr) = Ipv4Addr::from_str(candidate) {
                    return Some(addr.to_string());
                }
            }
            run.clear();
        }
    }
}

/// Reduce a path-like port descriptor (`ge-0/0/16`) to its trailing segment.
pub fn normalize_port(descriptor: &str) -> Option<String> {
    let segment = descriptor.trim().rsplit('/').next()?.trim();
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row2(a: &str, b: &str) -> Vec<Option<String>> {
        vec![some(a), some(b)]
    }

    fn row3(a: &str, b: &str, c: &str) -> Vec<Option<String>> {
        vec![some(a), some(b), some(c)]
    }

    fn some(s: &str) -> Option<String> {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }

    #[test]
    fn extracts_ipv4_from_noisy_text() {
        assert_eq!(
            extract_ipv4("BOA1FPOE2 10.12.0.5").as_deref(),
            Some("10.12.0.5")
        );
        assert_eq!(extract_ipv4("10.12.0.5").as_deref(), Some("10.12.0.5"));
        assert_eq!(
            extract_ipv4("rack4-192.168.1.20-poe").as_deref(),
            Some("192.168.1.20")
        );
    }

    #[test]
    fn extraction_fails_explicitly_without_a_valid_quad() {
        assert_eq!(extract_ipv4("BOA1FPOE2"), None);
        assert_eq!(extract_ipv4(""), None);
        assert_eq!(extract_ipv4("10.12.0"), None);
        // Octets out of range are not addresses.
        assert_eq!(extract_ipv4("10.12.0.256"), None);
        assert_eq!(extract_ipv4("999.1.1.1"), None);
    }

    #[test]
    fn extraction_returns_the_first_valid_token() {
        assert_eq!(
            extract_ipv4("primary 10.0.0.1 backup 10.0.0.2").as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn normalizes_path_like_port_descriptors() {
        assert_eq!(normalize_port("ge-0/0/16").as_deref(), Some("16"));
        assert_eq!(normalize_port("16").as_deref(), Some("16"));
        assert_eq!(normalize_port(" ge-0/0/7 ").as_deref(), Some("7"));
        assert_eq!(normalize_port("ge-0/0/"), None);
        assert_eq!(normalize_port(""), None);
    }

    #[test]
    fn rows_with_missing_required_cells_are_dropped() {
        let directory = Directory::build(
            vec![
                row2("Lobby", "10.0.0.1"),
                row2("", "10.0.0.2"),
                row2("Cafe", ""),
                row2("Office", "not an address"),
            ],
            vec![
                row3("Lobby", "10.0.1.1", "ge-0/0/16"),
                row3("Cafe", "10.0.1.2", ""),
                row3("", "10.0.1.3", "4"),
            ],
        );

        let locations: Vec<&str> = directory
            .records()
            .iter()
            .map(|r| r.location.as_str())
            .collect();
        assert_eq!(locations, vec!["Lobby"]);
        assert!(directory.assignment("Lobby").is_some());
        assert!(directory.assignment("Cafe").is_none());
    }

    #[test]
    fn loaded_records_are_never_partial() {
        let directory = Directory::build(
            vec![
                row2("A", "switch7 172.16.4.9"),
                row2("B", "b0rked"),
                row2("C", "10.1.2.3"),
            ],
            vec![row3("A", "172.16.4.10", "ge-0/0/3")],
        );

        for record in directory.records() {
            assert!(!record.location.is_empty());
            assert!(!record.address.is_empty());
            assert!(Ipv4Addr::from_str(&record.address).is_ok());
        }
        let assignment = directory.assignment("A").unwrap();
        assert_eq!(assignment.switch_address, "172.16.4.10");
        assert_eq!(assignment.port, "3");
    }

    #[test]
    fn numeric_port_cells_round_trip_without_decimal_suffix() {
        // Spreadsheets frequently store "16" as the float 16.0.
        assert_eq!(cell_text(&Data::Float(16.0)).as_deref(), Some("16"));
        assert_eq!(cell_text(&Data::Int(7)).as_deref(), Some("7"));
        assert_eq!(cell_text(&Data::Empty), None);
        assert_eq!(cell_text(&Data::String("  ".to_string())), None);
    }

    #[test]
    fn missing_workbook_is_a_directory_level_failure() {
        let err = Directory::load(Path::new("/nonexistent/locations.xlsx"));
        assert!(err.is_err());
    }

    #[test]
    fn corrupt_workbook_is_a_directory_level_failure() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not a workbook").unwrap();
        assert!(Directory::load(file.path()).is_err());
    }
}
