use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::defs::TAXONOMY_HEADER;
use crate::utils::table::KeyedTable;

/// Derives a sample label from a table path: file name minus the stage
/// suffix (the original pipeline's `--use-file-prefix` plus `sed`).
pub fn sample_label(path: &Path, strip_suffix: &str) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    name.strip_suffix(strip_suffix).unwrap_or(&name).to_string()
}

/// Full outer join of keyed tables on their key column.
///
/// The result's key set is the union of all input keys; a key absent from a
/// table gets `missing` in that table's columns. Value columns are labeled
/// per table: the bare label when the table has a single value column,
/// `<label>_<column>` otherwise. Row order is first-seen key order across
/// the inputs in input order; the key order is tracked explicitly so the
/// result never depends on map iteration order.
pub fn merge_tables(tables: &[(String, KeyedTable)], missing: &str) -> KeyedTable {
    let key_name = tables
        .first()
        .and_then(|(_, t)| t.header.first().cloned())
        .unwrap_or_else(|| "key".to_string());

    let mut key_order: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (_, table) in tables {
        for row in &table.rows {
            if seen.insert(row[0].clone()) {
                key_order.push(row[0].clone());
            }
        }
    }

    let mut header = vec![key_name];
    for (label, table) in tables {
        let value_cols = table.header.len().saturating_sub(1);
        if value_cols == 1 {
            header.push(label.clone());
        } else {
            for col in &table.header[1..] {
                header.push(format!("{}_{}", label, col));
            }
        }
    }

    let mut rows: Vec<Vec<String>> = key_order.into_iter().map(|k| vec![k]).collect();
    for (_, table) in tables {
        let value_cols = table.header.len().saturating_sub(1);
        let by_key: HashMap<&str, &Vec<String>> =
            table.rows.iter().map(|r| (r[0].as_str(), r)).collect();
        for row in rows.iter_mut() {
            match by_key.get(row[0].as_str()) {
                Some(src) => row.extend(src[1..].iter().cloned()),
                None => row.extend(std::iter::repeat(missing.to_string()).take(value_cols)),
            }
        }
    }

    KeyedTable { header, rows }
}

/// Merges per-sample taxonomy tables into one table with the fixed
/// `sequence..Species` header. Taxonomy is a property of the sequence, not
/// the sample, so the first table holding a key supplies its values; short
/// rows are padded with empties.
pub fn merge_taxonomy(tables: &[KeyedTable]) -> KeyedTable {
    let width = TAXONOMY_HEADER.len();
    let mut merged = KeyedTable::new(TAXONOMY_HEADER.iter().map(|s| s.to_string()).collect());
    let mut seen: HashSet<String> = HashSet::new();

    for table in tables {
        for row in &table.rows {
            if !seen.insert(row[0].clone()) {
                continue;
            }
            let mut out = row.clone();
            out.truncate(width);
            while out.len() < width {
                out.push(String::new());
            }
            merged.rows.push(out);
        }
    }
    merged
}
