//! Invoice field extraction module.

mod parser;
pub mod rules;

pub use parser::{EMPTY_TEXT, InvoiceParser, RuleInvoiceParser};
