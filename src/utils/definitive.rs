use std::collections::HashMap;

use crate::config::defs::PipelineError;
use crate::utils::table::KeyedTable;

/// Rank tags for taxonomy columns 3-8 of the merged taxonomy table. The
/// run-id and Kingdom columns are dropped from the tag string.
pub const RANK_TAGS: [&str; 6] = ["p__", "c__", "o__", "f__", "g__", "s__"];

/// Joins the identifier map, the merged taxonomy table, and the
/// id-rewritten abundance table into the final table keyed
/// `<id>:p__..;c__..;o__..;f__..;g__..;s__..`.
///
/// Every abundance row must resolve through both lookups; a gap means an
/// upstream inconsistency and is fatal, never silently dropped.
pub fn build_definitive(
    map: &KeyedTable,
    taxonomy: &KeyedTable,
    abundance: &KeyedTable,
) -> Result<KeyedTable, PipelineError> {
    let mut id2seq: HashMap<&str, &str> = HashMap::new();
    for row in &map.rows {
        if row.len() < 2 {
            return Err(PipelineError::TableFormat {
                path: "identifier map".to_string(),
                reason: format!("row for '{}' has no sequence column", row[0]),
            });
        }
        id2seq.insert(&row[0], &row[1]);
    }

    let mut seq2tax: HashMap<&str, String> = HashMap::new();
    for row in &taxonomy.rows {
        if row.len() < 2 + RANK_TAGS.len() {
            return Err(PipelineError::TableFormat {
                path: "merged taxonomy table".to_string(),
                reason: format!("row for '{}' has fewer than 8 columns", row[0]),
            });
        }
        let tagged: Vec<String> = RANK_TAGS
            .iter()
            .zip(&row[2..2 + RANK_TAGS.len()])
            .map(|(tag, value)| format!("{}{}", tag, value))
            .collect();
        seq2tax.insert(&row[0], tagged.join(";"));
    }

    let mut definitive = KeyedTable::new(abundance.header.clone());
    for row in &abundance.rows {
        let identifier = row[0].as_str();
        let sequence = id2seq
            .get(identifier)
            .ok_or_else(|| PipelineError::MissingJoinKey {
                key: identifier.to_string(),
                table: "identifier map".to_string(),
            })?;
        let tax = seq2tax
            .get(sequence)
            .ok_or_else(|| PipelineError::MissingJoinKey {
                key: (*sequence).to_string(),
                table: "merged taxonomy table".to_string(),
            })?;
        let mut out = row.clone();
        out[0] = format!("{}:{}", identifier, tax);
        definitive.rows.push(out);
    }
    Ok(definitive)
}
