use crate::domain::loan::LoanStatus;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// Final state of one scripted loan.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct LoanReportRow {
    pub loan: String,
    pub borrower: String,
    pub status: LoanStatus,
    pub amount: Decimal,
    pub installments: usize,
    pub paid: usize,
    pub installment_amount: Option<Decimal>,
}

pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header followed by one line per row, then flushes.
    pub fn write_rows(&mut self, rows: impl IntoIterator<Item = LoanReportRow>) -> Result<()> {
        let mut rows = rows.into_iter().peekable();
        if rows.peek().is_none() {
            self.writer.write_record([
                "loan",
                "borrower",
                "status",
                "amount",
                "installments",
                "paid",
                "installment_amount",
            ])?;
        }
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rows_are_rendered() {
        let mut out = Vec::new();
        ReportWriter::new(&mut out)
            .write_rows(vec![
                LoanReportRow {
                    loan: "L1".to_string(),
                    borrower: "U1".to_string(),
                    status: LoanStatus::Approved,
                    amount: dec!(50000),
                    installments: 6,
                    paid: 1,
                    installment_amount: Some(dec!(8627.42)),
                },
                LoanReportRow {
                    loan: "L2".to_string(),
                    borrower: "U2".to_string(),
                    status: LoanStatus::Rejected,
                    amount: dec!(1000),
                    installments: 0,
                    paid: 0,
                    installment_amount: None,
                },
            ])
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "loan,borrower,status,amount,installments,paid,installment_amount"
        );
        assert_eq!(lines[1], "L1,U1,APPROVED,50000,6,1,8627.42");
        assert_eq!(lines[2], "L2,U2,REJECTED,1000,0,0,");
    }

    #[test]
    fn test_empty_report_still_has_header() {
        let mut out = Vec::new();
        ReportWriter::new(&mut out).write_rows(Vec::new()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "loan,borrower,status,amount,installments,paid,installment_amount\n"
        );
    }
}
