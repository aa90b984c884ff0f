use crate::utils::table::KeyedTable;

/// Replaces sequence keys with compact `ASV<n>` identifiers.
///
/// Identifiers are minted in the table's row order, counting from 1, so the
/// same input file always yields the same assignment. Returns the
/// id-to-sequence map table (header `id\tsequence`) and the rewritten
/// abundance table, with the original header and value columns untouched.
pub fn assign_identifiers(table: &KeyedTable) -> (KeyedTable, KeyedTable) {
    let mut map = KeyedTable::new(vec!["id".to_string(), "sequence".to_string()]);
    let mut rewritten = KeyedTable::new(table.header.clone());

    for (i, row) in table.rows.iter().enumerate() {
        let identifier = format!("ASV{}", i + 1);
        map.rows
            .push(vec![identifier.clone(), row[0].clone()]);
        let mut out = row.clone();
        out[0] = identifier;
        rewritten.rows.push(out);
    }
    (map, rewritten)
}
