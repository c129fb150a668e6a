pub mod decoder;
pub mod fees;
pub mod fingerprint;
pub mod row_parser;

pub use decoder::{decode, DecodedFile, FileKind};
pub use fees::{FeeSchedule, FeeSource, ResolvedFees};
pub use fingerprint::{base_fingerprint, FingerprintSequencer};
pub use row_parser::{normalize_symbol, RawRow, RowParser};

use crate::error::Result;
use crate::models::CanonicalTrade;

/// A decoded and fully parsed upload, ready for persistence
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// Chronological. Rows sharing a timestamp keep their file order.
    pub trades: Vec<CanonicalTrade>,
    pub account_number: Option<String>,
}

/// Decode and parse a whole file. The first bad row fails everything.
pub fn parse_file(filename: &str, bytes: &[u8]) -> Result<ParsedFile> {
    let decoded = decode(filename, bytes)?;
    let parser = RowParser::new()?;

    let mut trades = decoded
        .rows
        .iter()
        .map(|row| parser.parse(row))
        .collect::<Result<Vec<_>>>()?;

    // Stable, so same-timestamp duplicates are numbered in file order
    trades.sort_by_key(|t| t.trade_date);

    Ok(ParsedFile {
        trades,
        account_number: decoded.account_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{exchange_offset, Symbol};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    #[test]
    fn test_parse_file_sorts_chronologically() {
        let csv = "Ativo;Abertura;Qtd;Resultado\nWINJ24;15/03/2024 11:00:00;1;30,00\nWDOJ24;15/03/2024 09:00:00;2;-10,00\n";
        let parsed = parse_file("trades.csv", csv.as_bytes()).unwrap();

        assert_eq!(parsed.trades.len(), 2);
        assert_eq!(parsed.trades[0].symbol, Symbol::Wdo);
        assert_eq!(parsed.trades[0].quantity, dec!(2));
        assert_eq!(parsed.trades[1].gross_pnl, dec!(30.00));
    }

    #[test]
    fn test_parse_file_aborts_on_first_bad_row() {
        let csv = "Ativo;Abertura;Resultado\nWINJ24;15/03/2024 11:00:00;30,00\nWINJ24;not a date;10,00\n";
        let err = parse_file("trades.csv", csv.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid date: not a date");
    }

    #[test]
    fn test_parse_file_rejects_unknown_extension() {
        assert!(parse_file("trades.txt", b"a,b\n1,2\n").is_err());
    }

    fn workbook_bytes() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let date_format = Format::new().set_num_format("dd/mm/yyyy hh:mm:ss");

        let sheet = workbook.add_worksheet();
        for (col, header) in ["Ativo", "Abertura", "Qtd", "Resultado"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        // Date-typed cell
        let opened = ExcelDateTime::from_ymd(2024, 3, 15).unwrap().and_hms(9, 35, 10).unwrap();
        sheet.write_string(1, 0, "WINJ24").unwrap();
        sheet.write_datetime_with_format(1, 1, &opened, &date_format).unwrap();
        sheet.write_number(1, 2, 2).unwrap();
        sheet.write_number(1, 3, 100.5).unwrap();
        // Date typed as text, as some brokers do
        sheet.write_string(2, 0, "WDOJ24").unwrap();
        sheet.write_string(2, 1, "15/03/2024 09:00:00").unwrap();
        sheet.write_number(2, 2, 1).unwrap();
        sheet.write_number(2, 3, -1250).unwrap();

        // Only the first sheet is read
        let summary = workbook.add_worksheet().set_name("Resumo").unwrap();
        summary.write_string(0, 0, "Ativo").unwrap();
        summary.write_string(1, 0, "not a trade").unwrap();

        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_parse_file_reads_xlsx_workbook() {
        let parsed = parse_file("Relatorio.XLSX", &workbook_bytes()).unwrap();
        assert_eq!(parsed.trades.len(), 2);
        assert_eq!(parsed.account_number, None);

        let at = |h, m, s| {
            let local = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(h, m, s).unwrap();
            exchange_offset().from_local_datetime(&local).single().unwrap().with_timezone(&Utc)
        };

        let wdo = &parsed.trades[0];
        assert_eq!(wdo.symbol, Symbol::Wdo);
        assert_eq!(wdo.trade_date, at(9, 0, 0));
        assert_eq!(wdo.quantity, dec!(1));
        assert_eq!(wdo.gross_pnl, dec!(-1250));

        let win = &parsed.trades[1];
        assert_eq!(win.symbol, Symbol::Win);
        assert_eq!(win.trade_date, at(9, 35, 10));
        assert_eq!(win.quantity, dec!(2));
        assert_eq!(win.gross_pnl, dec!(100.5));
    }
}
