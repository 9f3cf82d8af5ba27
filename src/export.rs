//! Export of the current-state set as a CSV spreadsheet or a text report.
//!
//! Only current records are exported, never the raw history. Both formats
//! share one fixed column set and render dates as `DD/MM/YYYY`.

use crate::models::MovementRecord;
use crate::models::stats::classify_deadline;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Column headings, in output order.
pub const EXPORT_COLUMNS: [&str; 10] = [
    "Número",
    "Setor",
    "Origem",
    "Interessado",
    "Assunto",
    "Data Entrada",
    "Data Saída",
    "Prazo",
    "Urgente",
    "Situação",
];

/// Table rows per report page.
pub const REPORT_PAGE_ROWS: usize = 40;

/// Character width of each report column.
const REPORT_WIDTHS: [usize; 10] = [16, 18, 10, 22, 28, 12, 12, 12, 7, 17];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Report,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "spreadsheet" => Some(ExportFormat::Csv),
            "report" | "txt" | "text" => Some(ExportFormat::Report),
            _ => None,
        }
    }
}

/// Format a date as `DD/MM/YYYY`, empty when absent.
pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_default()
}

/// One record as the cells of an export row.
pub fn export_row(record: &MovementRecord, today: NaiveDate) -> [String; 10] {
    [
        record.number.clone(),
        record.sector.clone(),
        record.origin.as_str().to_string(),
        record.interested_party.clone(),
        record.subject.clone(),
        format_date(record.entry_date),
        format_date(record.exit_date),
        format_date(record.deadline),
        if record.urgent { "Sim" } else { "Não" }.to_string(),
        classify_deadline(record.deadline, today).label().to_string(),
    ]
}

/// Write records as CSV with a header row. Returns the number of data rows.
pub fn write_csv<W: Write>(writer: W, records: &[&MovementRecord], today: NaiveDate) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(EXPORT_COLUMNS)?;
    for record in records {
        csv_writer.write_record(export_row(record, today))?;
    }
    csv_writer.flush()?;
    Ok(records.len())
}

fn fit(cell: &str, width: usize) -> String {
    let count = cell.chars().count();
    if count > width {
        let head: String = cell.chars().take(width.saturating_sub(1)).collect();
        format!("{}~", head)
    } else {
        format!("{}{}", cell, " ".repeat(width - count))
    }
}

fn table_line(cells: &[String]) -> String {
    cells
        .iter()
        .zip(REPORT_WIDTHS)
        .map(|(cell, width)| fit(cell, width))
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end()
        .to_string()
}

/// Render a paginated plain-text report.
pub fn render_report(records: &[&MovementRecord], today: NaiveDate) -> String {
    let heading: Vec<String> = EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect();
    let heading = table_line(&heading);
    let rule = "-".repeat(heading.chars().count());

    let pages: Vec<&[&MovementRecord]> = if records.is_empty() {
        vec![&[]]
    } else {
        records.chunks(REPORT_PAGE_ROWS).collect()
    };
    let total_pages = pages.len();

    let mut out = String::new();
    for (index, page) in pages.into_iter().enumerate() {
        if index > 0 {
            out.push('\u{c}');
            out.push('\n');
        }
        let _ = writeln!(out, "Relatório de Processos");
        let _ = writeln!(
            out,
            "Gerado em {} | {} processos | Página {} de {}",
            today.format("%d/%m/%Y"),
            records.len(),
            index + 1,
            total_pages
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", heading);
        let _ = writeln!(out, "{}", rule);
        for record in page {
            let _ = writeln!(out, "{}", table_line(&export_row(record, today)));
        }
    }
    out
}

/// Result of an export run.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub format: ExportFormat,
    pub path: String,
    pub rows: usize,
}

/// Export records to a file in the given format.
pub fn export_to_path(
    path: &Path,
    format: ExportFormat,
    records: &[&MovementRecord],
    today: NaiveDate,
) -> Result<ExportSummary> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidInput("output path is empty".to_string()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = BufWriter::new(File::create(path)?);
    let rows = match format {
        ExportFormat::Csv => write_csv(file, records, today)?,
        ExportFormat::Report => {
            let mut file = file;
            file.write_all(render_report(records, today).as_bytes())?;
            file.flush()?;
            records.len()
        }
    };

    tracing::info!(path = %path.display(), format = format.as_str(), rows, "exported records");
    Ok(ExportSummary {
        format,
        path: path.display().to_string(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Origin;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> MovementRecord {
        let mut r = MovementRecord::new("2024/001", date(2024, 3, 5));
        r.sector = "Jurídico".to_string();
        r.origin = Origin::Cgof;
        r.interested_party = "Prefeitura, Secretaria".to_string();
        r.subject = "Licitação".to_string();
        r.deadline = Some(date(2024, 6, 12));
        r.urgent = true;
        r
    }

    #[test]
    fn test_export_row_formats_dates_and_flags() {
        let row = export_row(&sample(), date(2024, 6, 10));
        assert_eq!(row[0], "2024/001");
        assert_eq!(row[2], "CGOF");
        assert_eq!(row[5], "05/03/2024");
        assert_eq!(row[6], "");
        assert_eq!(row[7], "12/06/2024");
        assert_eq!(row[8], "Sim");
        assert_eq!(row[9], "Próximo do prazo");
    }

    #[test]
    fn test_write_csv_has_fixed_header() {
        let record = sample();
        let mut buf = Vec::new();
        let rows = write_csv(&mut buf, &[&record], date(2024, 6, 10)).unwrap();
        assert_eq!(rows, 1);

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Número,Setor,Origem,Interessado,Assunto,Data Entrada,Data Saída,Prazo,Urgente,Situação"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("2024/001,Jurídico,CGOF,\"Prefeitura, Secretaria\",Licitação,05/03/2024,,12/06/2024,Sim,"));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_report_pagination() {
        let records: Vec<MovementRecord> = (0..REPORT_PAGE_ROWS + 1)
            .map(|i| MovementRecord::new(format!("P-{}", i), date(2024, 1, 1)))
            .collect();
        let refs: Vec<&MovementRecord> = records.iter().collect();
        let report = render_report(&refs, date(2024, 6, 10));

        assert!(report.contains("Página 1 de 2"));
        assert!(report.contains("Página 2 de 2"));
        assert!(report.contains("41 processos"));
        assert!(report.contains("Gerado em 10/06/2024"));
        assert_eq!(report.matches('\u{c}').count(), 1);
    }

    #[test]
    fn test_report_truncates_long_cells() {
        let mut record = sample();
        record.subject = "x".repeat(100);
        let report = render_report(&[&record], date(2024, 6, 10));
        assert!(!report.contains(&"x".repeat(29)));
        assert!(report.contains(&format!("{}~", "x".repeat(27))));
    }

    #[test]
    fn test_empty_report_still_has_heading() {
        let report = render_report(&[], date(2024, 6, 10));
        assert!(report.contains("Página 1 de 1"));
        assert!(report.contains("Situação"));
    }

    #[test]
    fn test_export_to_path() {
        let dir = TempDir::new().unwrap();
        let record = sample();

        let csv_path = dir.path().join("out/processos.csv");
        let summary =
            export_to_path(&csv_path, ExportFormat::Csv, &[&record], date(2024, 6, 10)).unwrap();
        assert_eq!(summary.rows, 1);
        assert!(std::fs::read_to_string(&csv_path).unwrap().contains("2024/001"));

        let report_path = dir.path().join("relatorio.txt");
        export_to_path(&report_path, ExportFormat::Report, &[&record], date(2024, 6, 10)).unwrap();
        assert!(
            std::fs::read_to_string(&report_path)
                .unwrap()
                .contains("Relatório de Processos")
        );
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("report"), Some(ExportFormat::Report));
        assert_eq!(ExportFormat::parse("pdf"), None);
    }
}
