use crate::models::{OrderSide, TradeLogEntry};
use chrono::DateTime;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column header written once when the log is created
pub const TRADE_LOG_HEADER: [&str; 6] = [
    "timestamp",
    "pair",
    "action",
    "price",
    "volume",
    "balance_snapshot",
];

#[derive(Error, Debug)]
pub enum TradeLogError {
    #[error("trade log I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed trade log row {row}: {message}")]
    Parse { row: usize, message: String },
}

/// Append-only CSV record of submitted trades
///
/// Rows are never rewritten, reordered or removed. The file is the only
/// state the bot persists.
#[derive(Debug, Clone)]
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, writing the header first if the file is new or empty
    ///
    /// The row is encoded in memory and written with a single `write_all`,
    /// then flushed to disk.
    pub fn append(&self, entry: &TradeLogEntry) -> Result<(), TradeLogError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;

        let len = file
            .metadata()
            .map_err(|source| self.io_error(source))?
            .len();
        let is_new = len == 0;

        let mut buffer = Vec::new();
        // Terminate a last line left unfinished by an earlier writer
        if !is_new && !self.ends_with_newline(&mut file)? {
            tracing::warn!(path = %self.path.display(), "Trade log did not end with a newline, repairing");
            buffer.push(b'\n');
        }
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buffer);

            if is_new {
                writer.write_record(TRADE_LOG_HEADER)?;
            }
            writer.write_record(encode_row(entry))?;
            writer.flush().map_err(|source| self.io_error(source))?;
        }

        file.write_all(&buffer)
            .map_err(|source| self.io_error(source))?;
        file.sync_data().map_err(|source| self.io_error(source))?;

        tracing::debug!(path = %self.path.display(), pair = %entry.pair, "Appended trade log row");

        Ok(())
    }

    /// Read every entry back in write order
    pub fn read_all(&self) -> Result<Vec<TradeLogEntry>, TradeLogError> {
        let file = File::open(&self.path).map_err(|source| self.io_error(source))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut entries = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result?;
            // Header is line 1, so data starts on line 2
            entries.push(decode_row(&record, index + 2)?);
        }

        Ok(entries)
    }

    fn ends_with_newline(&self, file: &mut File) -> Result<bool, TradeLogError> {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|source| self.io_error(source))?;
        Ok(last[0] == b'\n')
    }

    fn io_error(&self, source: std::io::Error) -> TradeLogError {
        TradeLogError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn encode_row(entry: &TradeLogEntry) -> [String; 6] {
    [
        entry.timestamp.to_rfc3339(),
        entry.pair.clone(),
        entry.action.as_str().to_string(),
        // f64 Display is the shortest text that parses back to the same value
        entry.price.to_string(),
        entry.volume.to_string(),
        entry.balance_snapshot.clone(),
    ]
}

fn decode_row(record: &csv::StringRecord, row: usize) -> Result<TradeLogEntry, TradeLogError> {
    if record.len() != TRADE_LOG_HEADER.len() {
        return Err(TradeLogError::Parse {
            row,
            message: format!(
                "expected {} fields, found {}",
                TRADE_LOG_HEADER.len(),
                record.len()
            ),
        });
    }

    let parse_err = |message: String| TradeLogError::Parse { row, message };

    let timestamp = DateTime::parse_from_rfc3339(&record[0])
        .map_err(|e| parse_err(format!("timestamp: {}", e)))?;
    let action: OrderSide = record[2].parse().map_err(parse_err)?;
    let price: f64 = record[3]
        .parse()
        .map_err(|e| parse_err(format!("price: {}", e)))?;
    let volume: f64 = record[4]
        .parse()
        .map_err(|e| parse_err(format!("volume: {}", e)))?;

    Ok(TradeLogEntry {
        timestamp,
        pair: record[1].to_string(),
        action,
        price,
        volume,
        balance_snapshot: record[5].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BalanceSnapshot;
    use chrono::{FixedOffset, TimeZone};
    use tempfile::tempdir;

    fn entry(pair: &str, action: OrderSide, price: f64, volume: f64) -> TradeLogEntry {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let balances: BalanceSnapshot = vec![
            ("ZCAD".to_string(), 152.25),
            ("XXDG".to_string(), 1200.0),
        ]
        .into_iter()
        .collect();

        TradeLogEntry {
            timestamp: offset.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap(),
            pair: pair.to_string(),
            action,
            price,
            volume,
            balance_snapshot: balances.to_json(),
        }
    }

    #[test]
    fn test_fresh_log_gets_single_header() {
        let dir = tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trade_log.csv"));

        log.append(&entry("DOGECAD", OrderSide::Buy, 0.2231, 511.0)).unwrap();
        log.append(&entry("ETHCAD", OrderSide::Sell, 4410.5, 0.03)).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,pair,action,price,volume,balance_snapshot");
        assert!(lines[1].contains("DOGECAD,buy,0.2231,511,"));
        assert!(lines[2].contains("ETHCAD,sell,4410.5,0.03,"));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_existing_log_is_appended_without_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trade_log.csv");

        TradeLog::new(&path)
            .append(&entry("DOGECAD", OrderSide::Buy, 0.2, 10.0))
            .unwrap();

        // A second logger over the same file, as after a restart
        let reopened = TradeLog::new(&path);
        reopened
            .append(&entry("SHIBUSD", OrderSide::Sell, 0.00001234, 1e6))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("timestamp,pair,action").count(), 1);
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn test_entries_read_back_losslessly() {
        let dir = tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trade_log.csv"));

        let written = vec![
            entry("PEPEUSD", OrderSide::Buy, 0.000012345678901, 6_075_331.123456789),
            entry("ETHCAD", OrderSide::Sell, 3521.17, 0.1 + 0.2),
        ];
        for e in &written {
            log.append(e).unwrap();
        }

        let read = log.read_all().unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn test_snapshot_with_commas_is_quoted() {
        let dir = tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("trade_log.csv"));

        let e = entry("DOGECAD", OrderSide::Buy, 0.25, 300.0);
        log.append(&e).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains(r#""{""XXDG"":1200.0,""ZCAD"":152.25}""#));
        assert_eq!(log.read_all().unwrap()[0].balance_snapshot, e.balance_snapshot);
    }

    #[test]
    fn test_unterminated_last_line_is_not_joined() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trade_log.csv");
        // Last row written without its newline
        std::fs::write(
            &path,
            "timestamp,pair,action,price,volume,balance_snapshot\n\
             2025-03-14T09:26:53-05:00,DOGECAD,buy,0.25,300,{}",
        )
        .unwrap();

        let log = TradeLog::new(&path);
        log.append(&entry("ETHCAD", OrderSide::Sell, 4410.5, 0.03)).unwrap();

        let read = log.read_all().unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].pair, "DOGECAD");
        assert_eq!(read[0].volume, 300.0);
        assert_eq!(read[1].pair, "ETHCAD");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(!contents.contains("\n\n"));
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let dir = tempdir().unwrap();
        let log = TradeLog::new(dir.path().join("missing").join("trade_log.csv"));

        let result = log.append(&entry("DOGECAD", OrderSide::Buy, 0.25, 300.0));
        assert!(matches!(result, Err(TradeLogError::Io { .. })));
    }

    #[test]
    fn test_malformed_row_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trade_log.csv");
        std::fs::write(
            &path,
            "timestamp,pair,action,price,volume,balance_snapshot\n\
             2025-03-14T09:26:53-05:00,DOGECAD,hold,0.25,300,{}\n",
        )
        .unwrap();

        let result = TradeLog::new(&path).read_all();
        assert!(matches!(result, Err(TradeLogError::Parse { row: 2, .. })));
    }
}
