//! CSV variable tables
//!
//! Column roles are recognized by substring of the header text, case-sensitive:
//! a header containing `ID` holds the address, `Type` the kind and `Name` the
//! variable name. Roles are tested in that order per header and the first
//! column found for a role wins; other columns (`No.`, comments) are ignored.

use crate::core::types::{Variable, VariableKind};
use crate::error::ConfigurationError;
use csv::ReaderBuilder;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Columns {
    address: Option<usize>,
    kind: Option<usize>,
    name: Option<usize>,
}

fn detect_columns<'a>(headers: impl Iterator<Item = &'a str>) -> Columns {
    let mut columns = Columns::default();
    for (index, header) in headers.enumerate() {
        if header.contains("ID") {
            columns.address.get_or_insert(index);
        } else if header.contains("Type") {
            columns.kind.get_or_insert(index);
        } else if header.contains("Name") {
            columns.name.get_or_insert(index);
        }
    }
    columns
}

/// Load a variable table
///
/// `default_kind` is used when the table has no `Type` column.
pub fn load_variable_table(
    path: &Path,
    default_kind: Option<VariableKind>,
) -> Result<Vec<Variable>, ConfigurationError> {
    let table_path = path.display().to_string();
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ConfigurationError::table(&table_path, e.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|e| ConfigurationError::table(&table_path, e.to_string()))?
        .clone();
    let columns = detect_columns(headers.iter());
    debug!("Variable table {} columns: {:?}", table_path, columns);

    let address_col = columns
        .address
        .ok_or_else(|| ConfigurationError::table(&table_path, "no column header contains 'ID'"))?;
    let name_col = columns
        .name
        .ok_or_else(|| ConfigurationError::table(&table_path, "no column header contains 'Name'"))?;
    if columns.kind.is_none() && default_kind.is_none() {
        return Err(ConfigurationError::table(
            &table_path,
            "no column header contains 'Type' and the group sets no kind",
        ));
    }

    let mut variables = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| ConfigurationError::table(&table_path, e.to_string()))?;
        // Header is line 1
        let line = row + 2;

        let address = record.get(address_col).map(str::trim).unwrap_or_default();
        if address.is_empty() {
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            return Err(ConfigurationError::table(
                &table_path,
                format!("line {}: empty address", line),
            ));
        }

        let name = record.get(name_col).map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(ConfigurationError::table(
                &table_path,
                format!("line {}: empty name for {}", line, address),
            ));
        }

        let kind = match (columns.kind.and_then(|col| record.get(col)), default_kind) {
            (Some(raw), _) if !raw.trim().is_empty() => raw
                .parse::<VariableKind>()
                .map_err(|e| ConfigurationError::table(&table_path, format!("line {}: {}", line, e)))?,
            (_, Some(kind)) => kind,
            (_, None) => {
                return Err(ConfigurationError::table(
                    &table_path,
                    format!("line {}: missing type for {}", line, address),
                ))
            },
        };

        variables.push(Variable::new(address, kind, name));
    }

    info!("Loaded {} variables from {}", variables.len(), table_path);
    Ok(variables)
}
