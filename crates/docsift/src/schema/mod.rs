//! Document-type registry: array fields, dedup keys, validators and default
//! extraction schemas.

mod strict;

pub use strict::to_strict;

use once_cell::sync::Lazy;
use serde_json::{Value, json};

use crate::types::DocumentType;

/// Static behaviour table for one document type.
#[derive(Debug, Clone, Copy)]
pub struct DocTypeSpec {
    /// Top-level array field the extracted rows live in, when the type has
    /// one.
    pub array_field: Option<&'static str>,
    /// Fields forming the dedup composite key, in order.
    pub dedup_keys: &'static [&'static str],
    /// Validator names configured for this type.
    pub validators: &'static [&'static str],
}

const INVOICE: DocTypeSpec = DocTypeSpec {
    array_field: Some("invoiceRows"),
    dedup_keys: &["invoiceNumber"],
    validators: &[],
};

const BANK_STATEMENT: DocTypeSpec = DocTypeSpec {
    array_field: Some("transactions"),
    dedup_keys: &["date", "description", "amount"],
    validators: &[],
};

const LOAN_CONTRACT: DocTypeSpec = DocTypeSpec {
    array_field: None,
    dedup_keys: &["contractNumber"],
    validators: &[],
};

const DRAWDOWN: DocTypeSpec = DocTypeSpec {
    array_field: Some("drawdowns"),
    dedup_keys: &["variableSymbol", "invoiceNumber"],
    validators: &["iban"],
};

/// Behaviour table lookup for a document type.
pub fn spec_for(doc_type: DocumentType) -> &'static DocTypeSpec {
    match doc_type {
        DocumentType::Invoice => &INVOICE,
        DocumentType::BankStatement => &BANK_STATEMENT,
        DocumentType::LoanContract => &LOAN_CONTRACT,
        DocumentType::Drawdown => &DRAWDOWN,
    }
}

static INVOICE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "invoiceNumber": { "type": "string" },
            "issueDate": { "type": "string" },
            "dueDate": { "type": "string" },
            "supplierName": { "type": "string" },
            "supplierTaxId": { "type": "string" },
            "customerName": { "type": "string" },
            "currency": { "type": "string" },
            "totalNet": { "type": "number" },
            "totalVat": { "type": "number" },
            "totalGross": { "type": "number" },
            "iban": { "type": "string" },
            "variableSymbol": { "type": "string" },
            "invoiceRows": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "invoiceNumber": { "type": "string" },
                        "description": { "type": "string" },
                        "quantity": { "type": "number" },
                        "unitPrice": { "type": "number" },
                        "amount": { "type": "number" }
                    }
                }
            }
        }
    })
});

static BANK_STATEMENT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "accountNumber": { "type": "string" },
            "iban": { "type": "string" },
            "statementNumber": { "type": "string" },
            "periodFrom": { "type": "string" },
            "periodTo": { "type": "string" },
            "openingBalance": { "type": "number" },
            "closingBalance": { "type": "number" },
            "currency": { "type": "string" },
            "transactions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "date": { "type": "string" },
                        "description": { "type": "string" },
                        "amount": { "type": "number" },
                        "counterpartyAccount": { "type": "string" },
                        "variableSymbol": { "type": "string" }
                    }
                }
            }
        }
    })
});

static LOAN_CONTRACT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "contractNumber": { "type": "string" },
            "borrowerName": { "type": "string" },
            "lenderName": { "type": "string" },
            "principalAmount": { "type": "number" },
            "currency": { "type": "string" },
            "interestRate": { "type": "number" },
            "signedDate": { "type": "string" },
            "maturityDate": { "type": "string" },
            "iban": { "type": "string" }
        }
    })
});

static DRAWDOWN_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "totalSum": { "type": "number" },
            "currency": { "type": "string" },
            "drawdowns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "invoiceNumber": { "type": "string" },
                        "variableSymbol": { "type": "string" },
                        "amount": { "type": "number" },
                        "iban": { "type": "string" },
                        "supplierName": { "type": "string" }
                    }
                }
            }
        }
    })
});

/// Built-in extraction schema for a document type, used when a request
/// supplies neither `schema` nor `customSchema`.
pub fn default_schema(doc_type: DocumentType) -> &'static Value {
    match doc_type {
        DocumentType::Invoice => &INVOICE_SCHEMA,
        DocumentType::BankStatement => &BANK_STATEMENT_SCHEMA,
        DocumentType::LoanContract => &LOAN_CONTRACT_SCHEMA,
        DocumentType::Drawdown => &DRAWDOWN_SCHEMA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_field_map() {
        assert_eq!(spec_for(DocumentType::Drawdown).array_field, Some("drawdowns"));
        assert_eq!(spec_for(DocumentType::Invoice).array_field, Some("invoiceRows"));
        assert_eq!(spec_for(DocumentType::BankStatement).array_field, Some("transactions"));
        assert_eq!(spec_for(DocumentType::LoanContract).array_field, None);
    }

    #[test]
    fn test_drawdown_validators_and_keys() {
        let spec = spec_for(DocumentType::Drawdown);
        assert_eq!(spec.validators, &["iban"]);
        assert_eq!(spec.dedup_keys, &["variableSymbol", "invoiceNumber"]);
    }

    #[test]
    fn test_default_schemas_have_array_fields() {
        for doc_type in [DocumentType::Invoice, DocumentType::BankStatement, DocumentType::Drawdown] {
            let field = spec_for(doc_type).array_field.unwrap();
            let schema = default_schema(doc_type);
            assert!(
                schema["properties"][field].is_object(),
                "{doc_type} schema is missing its array field"
            );
        }
    }
}
