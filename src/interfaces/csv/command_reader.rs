use crate::error::{LendingError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Apply,
    Approve,
    Reject,
    Disburse,
    Pay,
    Settle,
    Reconcile,
}

/// One row of a scenario script.
///
/// `ref` names what the row creates (a loan for `apply`, a payment for
/// `pay`) or the payment it acts on (`settle`, `reconcile`); `loan` points
/// at a loan created earlier in the script. `detail` carries the rejection
/// reason, the installment sequence to pay, or the reported gateway status.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScriptCommand {
    pub command: CommandKind,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub loan: Option<String>,
    #[serde(default)]
    pub borrower: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub tenure: Option<u32>,
    #[serde(default)]
    pub rate: Option<Decimal>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ScriptCommand {
    pub fn require<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
        field
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| LendingError::ValidationError(format!("missing '{name}' column")))
    }
}

/// Reads scenario commands from a CSV source.
///
/// Whitespace is trimmed and trailing empty columns may be omitted.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one result per data row.
    pub fn commands(self) -> impl Iterator<Item = Result<ScriptCommand>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LendingError::from))
    }
}
