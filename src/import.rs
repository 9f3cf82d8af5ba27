//! Bulk import of movement rows from spreadsheet exports (CSV).
//!
//! Headers are matched against a synonym table after folding case, accents,
//! and whitespace, so `Nº Processo`, `numero` and `NÚMERO` all land on the
//! process number. Dates may be textual (`DD/MM/YYYY`, ISO) or spreadsheet
//! serial numbers. Parsed rows are written through a [`MovementSink`] in
//! fixed-size batches; the first failing batch aborts the import.

use crate::models::{Actor, MovementFields, MovementRecord, fold_text};
use crate::storage::Storage;
use crate::{Error, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Rows written per batch when nothing else is configured.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Largest serial accepted (9999-12-31 in the 1900 date system).
const MAX_SERIAL: f64 = 2_958_465.0;

/// Smallest bare number a date cell is read as a serial (1927-05-18).
/// Shorter numbers such as a lone year are rejected.
const MIN_CELL_SERIAL: f64 = 10_000.0;

/// Day zero of the 1900 spreadsheet date system.
///
/// 1899-12-30 rather than 12-31 absorbs the fictitious 1900-02-29.
pub fn serial_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN)
}

/// A column the importer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Number,
    Sector,
    Origin,
    InterestedParty,
    Subject,
    Observations,
    EntryDate,
    ExitDate,
    Deadline,
    Urgent,
}

/// Accepted header spellings, already folded.
const SYNONYMS: &[(Column, &[&str])] = &[
    (
        Column::Number,
        &[
            "numero",
            "processo",
            "no processo",
            "n processo",
            "numero do processo",
            "numero processo",
            "num processo",
            "n",
            "no",
        ],
    ),
    (Column::Sector, &["setor", "setor atual", "localizacao", "local"]),
    (Column::Origin, &["origem", "orgao de origem", "unidade de origem"]),
    (
        Column::InterestedParty,
        &["interessado", "interessada", "interessados", "requerente"],
    ),
    (Column::Subject, &["assunto", "objeto", "descricao"]),
    (Column::Observations, &["observacoes", "observacao", "obs", "obs."]),
    (
        Column::EntryDate,
        &["data entrada", "entrada", "data de entrada", "dt entrada", "data"],
    ),
    (
        Column::ExitDate,
        &["data saida", "saida", "data de saida", "dt saida"],
    ),
    (
        Column::Deadline,
        &["prazo", "data prazo", "prazo final", "vencimento"],
    ),
    (Column::Urgent, &["urgente", "urgencia", "prioridade"]),
];

/// Match one raw header against the synonym table.
pub fn match_header(raw: &str) -> Option<Column> {
    let folded = fold_text(raw.trim_start_matches('\u{feff}'));
    SYNONYMS
        .iter()
        .find(|(_, names)| names.contains(&folded.as_str()))
        .map(|(column, _)| *column)
}

/// Positions of recognised columns in a header row.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    positions: HashMap<Column, usize>,
    /// Headers that matched nothing
    pub unrecognized: Vec<String>,
}

impl HeaderMap {
    /// Map a header row. The first occurrence of a column wins.
    ///
    /// Fails if no column maps to the process number.
    pub fn from_headers<'a, I>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut map = HeaderMap::default();
        for (index, raw) in headers.into_iter().enumerate() {
            match match_header(raw) {
                Some(column) => {
                    map.positions.entry(column).or_insert(index);
                }
                None if !raw.trim().is_empty() => map.unrecognized.push(raw.trim().to_string()),
                None => {}
            }
        }

        if !map.positions.contains_key(&Column::Number) {
            return Err(Error::InvalidInput(
                "no process number column found in header".to_string(),
            ));
        }
        Ok(map)
    }

    pub fn position(&self, column: Column) -> Option<usize> {
        self.positions.get(&column).copied()
    }

    fn cell<'r>(&self, row: &'r csv::StringRecord, column: Column) -> Option<&'r str> {
        self.position(column).and_then(|i| row.get(i)).map(str::trim)
    }
}

/// Convert a spreadsheet serial number to a date. Fractions (time of day) are dropped.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > MAX_SERIAL {
        return None;
    }
    serial_epoch().checked_add_signed(Duration::days(serial.trunc() as i64))
}

/// The spreadsheet serial number of a date.
pub fn date_to_serial(date: NaiveDate) -> i64 {
    (date - serial_epoch()).num_days()
}

/// Parse an imported date cell.
///
/// Accepts `DD/MM/YYYY` (also with `-` or `.`), ISO `YYYY-MM-DD` optionally
/// followed by a time, and serial numbers. Returns `None` for anything else.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    for format in ["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    if let Some(head) = value.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            return Some(date);
        }
    }
    // Decimal commas show up in serials exported with a Portuguese locale.
    value
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|serial| *serial >= MIN_CELL_SERIAL)
        .and_then(serial_to_date)
}

/// Interpret an urgency cell. Empty and unknown values are not urgent.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        fold_text(raw).as_str(),
        "sim" | "s" | "yes" | "y" | "true" | "1" | "x" | "urgente"
    )
}

/// A data row that was not imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    /// 1-based line in the source file
    pub line: u64,
    pub reason: String,
}

/// Rows parsed from a source file, before any write.
#[derive(Debug, Clone, Default)]
pub struct ParsedImport {
    pub records: Vec<MovementRecord>,
    pub skipped: Vec<SkippedRow>,
    /// Rows whose entry date was missing or unparseable and fell back to today
    pub defaulted_entry_dates: usize,
    pub unrecognized_headers: Vec<String>,
}

/// Choose `;` when it dominates the header line, else `,`.
fn sniff_delimiter(data: &str) -> u8 {
    let header = data.lines().next().unwrap_or_default();
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas { b';' } else { b',' }
}

/// Parse CSV text into movement records.
///
/// Rows with an empty number are skipped and reported. An entry date that
/// is missing or unparseable becomes `today`; other dates become absent.
pub fn parse_csv(data: &str, today: NaiveDate) -> Result<ParsedImport> {
    let data = data.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(data))
        .flexible(true)
        .from_reader(data.as_bytes());

    let headers = reader.headers()?.clone();
    let map = HeaderMap::from_headers(headers.iter())?;

    let mut parsed = ParsedImport {
        unrecognized_headers: map.unrecognized.clone(),
        ..Default::default()
    };

    for row in reader.records() {
        let row = row?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let number = map.cell(&row, Column::Number).unwrap_or_default();
        if number.is_empty() {
            parsed.skipped.push(SkippedRow {
                line,
                reason: "empty process number".to_string(),
            });
            continue;
        }

        let entry_date = match map.cell(&row, Column::EntryDate).and_then(parse_date) {
            Some(date) => date,
            None => {
                parsed.defaulted_entry_dates += 1;
                today
            }
        };

        let text = |column| map.cell(&row, column).map(str::to_string);
        let fields = MovementFields {
            number: Some(number.to_string()),
            sector: text(Column::Sector),
            origin: text(Column::Origin),
            interested_party: text(Column::InterestedParty),
            subject: text(Column::Subject),
            observations: text(Column::Observations),
            entry_date: Some(entry_date),
            exit_date: map.cell(&row, Column::ExitDate).map(parse_date),
            deadline: map.cell(&row, Column::Deadline).map(parse_date),
            urgent: map.cell(&row, Column::Urgent).map(parse_flag),
        };
        parsed.records.push(fields.into_record()?);
    }

    tracing::debug!(
        rows = parsed.records.len(),
        skipped = parsed.skipped.len(),
        "parsed import file"
    );
    Ok(parsed)
}

/// Read and parse a CSV file.
/// Read and parse an import file. Files that are not valid UTF-8 are decoded
/// as Windows-1252, the encoding legacy spreadsheet exports use.
pub fn parse_file(path: &Path, today: NaiveDate) -> Result<ParsedImport> {
    let bytes = fs::read(path)?;
    let data = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(err.as_bytes());
            tracing::debug!(path = %path.display(), "decoded import file as Windows-1252");
            text.into_owned()
        }
    };
    parse_csv(&data, today)
}

/// Destination of imported batches.
pub trait MovementSink {
    /// Write one batch atomically, returning the number of rows written.
    fn write_batch(&mut self, batch: &[MovementRecord]) -> Result<usize>;
}

/// Writes batches into the SQLite store on behalf of an actor.
pub struct StorageSink<'a> {
    storage: &'a mut Storage,
    actor: &'a Actor,
}

impl<'a> StorageSink<'a> {
    pub fn new(storage: &'a mut Storage, actor: &'a Actor) -> Self {
        Self { storage, actor }
    }
}

impl MovementSink for StorageSink<'_> {
    fn write_batch(&mut self, batch: &[MovementRecord]) -> Result<usize> {
        self.storage.upsert_movements(batch, self.actor)
    }
}

/// Outcome of writing all batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub written: usize,
    pub batches: usize,
}

/// Write records in consecutive batches of `batch_size`.
///
/// Stops at the first failing batch; earlier batches stay committed and
/// later ones are never attempted.
pub fn write_batches<S: MovementSink>(
    sink: &mut S,
    records: &[MovementRecord],
    batch_size: usize,
) -> Result<BatchReport> {
    let mut report = BatchReport {
        written: 0,
        batches: 0,
    };

    for (index, chunk) in records.chunks(batch_size.max(1)).enumerate() {
        match sink.write_batch(chunk) {
            Ok(written) => {
                report.written += written;
                report.batches += 1;
                tracing::debug!(batch = index + 1, rows = written, "import batch committed");
            }
            Err(e) => {
                tracing::warn!(batch = index + 1, error = %e, "import batch failed");
                return Err(Error::ImportAborted {
                    batch: index + 1,
                    committed: report.written,
                    source: Box::new(e),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Origin;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 6, 10)
    }

    #[test]
    fn test_header_synonyms() {
        for raw in ["Número", "numero", "Processo", "Nº Processo", " NÚMERO  DO PROCESSO "] {
            assert_eq!(match_header(raw), Some(Column::Number), "{}", raw);
        }
        for raw in ["Data Entrada", "Entrada", "Data de Entrada", "data  entrada"] {
            assert_eq!(match_header(raw), Some(Column::EntryDate), "{}", raw);
        }
        assert_eq!(match_header("Data Saída"), Some(Column::ExitDate));
        assert_eq!(match_header("Observações"), Some(Column::Observations));
        assert_eq!(match_header("\u{feff}Setor"), Some(Column::Sector));
        assert_eq!(match_header("Cor favorita"), None);
    }

    #[test]
    fn test_header_map_requires_number() {
        assert!(matches!(
            HeaderMap::from_headers(["Setor", "Entrada"]),
            Err(Error::InvalidInput(_))
        ));
        let map = HeaderMap::from_headers(["Processo", "Extra", "Número"]).unwrap();
        assert_eq!(map.position(Column::Number), Some(0));
        assert_eq!(map.unrecognized, vec!["Extra".to_string()]);
    }

    #[test]
    fn test_serial_dates() {
        assert_eq!(serial_to_date(45000.0), Some(date(2023, 3, 15)));
        assert_eq!(serial_to_date(45366.0), Some(date(2024, 3, 15)));
        assert_eq!(serial_to_date(45366.75), Some(date(2024, 3, 15)));
        assert_eq!(serial_to_date(1.0), Some(date(1899, 12, 31)));
        assert_eq!(serial_to_date(0.0), None);
        assert_eq!(serial_to_date(-3.0), None);
        assert_eq!(serial_to_date(f64::NAN), None);
        assert_eq!(date_to_serial(date(2024, 3, 15)), 45366);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = Some(date(2024, 3, 15));
        assert_eq!(parse_date("15/03/2024"), expected);
        assert_eq!(parse_date("15-03-2024"), expected);
        assert_eq!(parse_date("2024-03-15"), expected);
        assert_eq!(parse_date("2024-03-15T12:00:00"), expected);
        assert_eq!(parse_date("45366"), expected);
        assert_eq!(parse_date("45366,5"), expected);
        assert_eq!(parse_date("  "), None);
        assert_eq!(parse_date("31/02/2024"), None);
        assert_eq!(parse_date("amanhã"), None);
    }

    #[test]
    fn test_short_numbers_are_not_serials() {
        assert_eq!(parse_date("2024"), None);
        assert_eq!(parse_date("9999"), None);
        assert_eq!(parse_date("7"), None);
        assert_eq!(parse_date("10000"), Some(date(1927, 5, 18)));
        assert_eq!(parse_date("45366"), Some(date(2024, 3, 15)));
    }

    #[test]
    fn test_textual_and_serial_dates_agree() {
        let textual = parse_csv("Número,Data Entrada\n1,15/03/2024\n", today()).unwrap();
        let serial = parse_csv("Processo,Entrada\n1,45366\n", today()).unwrap();
        assert_eq!(textual.records[0].entry_date, Some(date(2024, 3, 15)));
        assert_eq!(textual.records[0].entry_date, serial.records[0].entry_date);
    }

    #[test]
    fn test_parse_csv_full_row() {
        let data = "Nº Processo;Setor;Origem;Interessado;Assunto;Data de Entrada;Prazo;Data Saída;Urgente\n\
                    2024/001; Jurídico ;gab;Prefeitura;Licitação;01/02/2024;2024-03-01;;Sim\n";
        let parsed = parse_csv(data, today()).unwrap();
        assert_eq!(parsed.records.len(), 1);

        let r = &parsed.records[0];
        assert_eq!(r.number, "2024/001");
        assert_eq!(r.sector, "Jurídico");
        assert_eq!(r.origin, Origin::Gabinete);
        assert_eq!(r.interested_party, "Prefeitura");
        assert_eq!(r.entry_date, Some(date(2024, 2, 1)));
        assert_eq!(r.deadline, Some(date(2024, 3, 1)));
        assert_eq!(r.exit_date, None);
        assert!(r.urgent);
    }

    #[test]
    fn test_parse_csv_skips_empty_numbers_and_defaults_dates() {
        let data = "Número,Entrada,Prazo\n,01/01/2024,\n7,garbage,garbage\n,,\n8,02/01/2024,\n";
        let parsed = parse_csv(data, today()).unwrap();

        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.skipped[0].line, 2);
        assert_eq!(parsed.defaulted_entry_dates, 1);
        assert_eq!(parsed.records[0].entry_date, Some(today()));
        assert_eq!(parsed.records[0].deadline, None);
        assert_eq!(parsed.records[1].entry_date, Some(date(2024, 1, 2)));
    }

    #[test]
    fn test_parse_csv_without_number_column_fails() {
        assert!(parse_csv("Setor,Entrada\nA,01/01/2024\n", today()).is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("Sim"));
        assert!(parse_flag(" X "));
        assert!(parse_flag("true"));
        assert!(!parse_flag("não"));
        assert!(!parse_flag(""));
    }

    /// Records batch sizes and fails on a chosen batch.
    struct RecordingSink {
        fail_on: Option<usize>,
        calls: Vec<usize>,
    }

    impl MovementSink for RecordingSink {
        fn write_batch(&mut self, batch: &[MovementRecord]) -> Result<usize> {
            self.calls.push(batch.len());
            if self.fail_on == Some(self.calls.len()) {
                return Err(Error::Other("store unavailable".to_string()));
            }
            Ok(batch.len())
        }
    }

    fn records(n: usize) -> Vec<MovementRecord> {
        (0..n)
            .map(|i| MovementRecord::new(i.to_string(), date(2024, 1, 1)))
            .collect()
    }

    #[test]
    fn test_batches_are_ceil_n_over_b() {
        let mut sink = RecordingSink {
            fail_on: None,
            calls: Vec::new(),
        };
        let report = write_batches(&mut sink, &records(250), 100).unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.written, 250);
        assert_eq!(sink.calls, vec![100, 100, 50]);
    }

    #[test]
    fn test_failed_batch_aborts_remaining() {
        let mut sink = RecordingSink {
            fail_on: Some(2),
            calls: Vec::new(),
        };
        let err = write_batches(&mut sink, &records(350), 100).unwrap_err();
        match err {
            Error::ImportAborted {
                batch, committed, ..
            } => {
                assert_eq!(batch, 2);
                assert_eq!(committed, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sink.calls.len(), 2);
    }

    #[test]
    fn test_empty_input_writes_nothing() {
        let mut sink = RecordingSink {
            fail_on: Some(1),
            calls: Vec::new(),
        };
        let report = write_batches(&mut sink, &[], 10).unwrap();
        assert_eq!(report.batches, 0);
        assert!(sink.calls.is_empty());
    }

    #[test]
    fn test_parse_file_reads_windows_1252() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("planilha.csv");
        fs::write(&path, b"N\xfamero,Data Entrada\n1,15/03/2024\n").unwrap();

        let parsed = parse_file(&path, today()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].number, "1");
        assert_eq!(parsed.records[0].entry_date, Some(date(2024, 3, 15)));
    }

    #[test]
    fn test_parse_file_keeps_utf8() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("planilha.csv");
        fs::write(&path, "Número,Setor,Data Entrada\n1,Jurídico,15/03/2024\n").unwrap();

        let parsed = parse_file(&path, today()).unwrap();
        assert_eq!(parsed.records[0].sector, "Jurídico");
    }

    #[test]
    fn test_storage_sink_commits_earlier_batches() {
        let env = crate::test_utils::TestEnv::new();
        let mut storage = env.init_storage();
        let actor = Actor::system();

        let mut rows = records(5);
        rows[3].entry_date = None;
        let result = write_batches(&mut StorageSink::new(&mut storage, &actor), &rows, 2);

        assert!(matches!(
            result,
            Err(Error::ImportAborted {
                batch: 2,
                committed: 2,
                ..
            })
        ));
        assert_eq!(storage.count_movements().unwrap(), 2);
    }
}
