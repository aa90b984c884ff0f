use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::defs::PipelineError;

/// Tab-separated table with a header line; the first column is the join key
/// and must be unique within the table. Rows keep file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl KeyedTable {
    pub fn new(header: Vec<String>) -> Self {
        KeyedTable {
            header,
            rows: Vec::new(),
        }
    }

    pub fn read_tsv(path: &Path) -> Result<Self, PipelineError> {
        let display = path.display().to_string();
        let file = File::open(path)
            .map_err(|e| PipelineError::IOError(format!("{}: {}", display, e)))?;
        let mut lines = BufReader::new(file).lines();

        let header_line = match lines.next() {
            Some(line) => line?,
            None => {
                return Err(PipelineError::TableFormat {
                    path: display,
                    reason: "empty file, expected a header line".to_string(),
                })
            }
        };
        let header: Vec<String> = header_line.split('\t').map(str::to_string).collect();

        let mut rows = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (lineno, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let row: Vec<String> = line.split('\t').map(str::to_string).collect();
            if row.len() != header.len() {
                return Err(PipelineError::TableFormat {
                    path: display,
                    reason: format!(
                        "line {}: {} field(s), header has {}",
                        lineno + 2,
                        row.len(),
                        header.len()
                    ),
                });
            }
            if !seen.insert(row[0].clone()) {
                return Err(PipelineError::TableFormat {
                    path: display,
                    reason: format!("duplicate key '{}'", row[0]),
                });
            }
            rows.push(row);
        }
        Ok(KeyedTable { header, rows })
    }

    pub fn write_tsv(&self, path: &Path) -> Result<(), PipelineError> {
        let display = path.display().to_string();
        let file = File::create(path)
            .map_err(|e| PipelineError::IOError(format!("{}: {}", display, e)))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", self.header.join("\t"))?;
        for row in &self.rows {
            writeln!(writer, "{}", row.join("\t"))?;
        }
        writer.flush()?;
        Ok(())
    }
}
