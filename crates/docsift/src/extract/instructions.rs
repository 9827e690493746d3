//! Extraction instruction (prompt) assembly.

use serde_json::Value;

use crate::types::DocumentType;

/// Token in a custom prompt replaced with the schema JSON.
pub const SCHEMA_TOKEN: &str = "{{schema}}";

/// Lead-in text placed before tile images in a model call.
pub const TILE_LEAD_IN: &str = "Extract data from this document section:";

const INVOICE_PROMPT: &str = "\
You extract structured data from invoices.\n\
Read the document carefully and return a single JSON object.\n\
Copy identifiers (invoice number, variable symbol, tax IDs, IBAN) character \
for character; never guess digits that are not legible.\n\
Amounts use a dot as the decimal separator; strip currency symbols and \
thousands separators.\n\
Dates are returned in ISO 8601 (YYYY-MM-DD) format.";

const BANK_STATEMENT_PROMPT: &str = "\
You extract structured data from bank statements.\n\
Return a single JSON object with every transaction listed in the statement, \
in document order.\n\
Copy dates, descriptions and counterparty accounts exactly as printed.\n\
Amounts are signed numbers with a dot decimal separator: debits negative, \
credits positive.";

const LOAN_CONTRACT_PROMPT: &str = "\
You extract structured data from loan contracts.\n\
Return a single JSON object describing the contract.\n\
Copy the contract number and IBAN character for character.\n\
Express rates and amounts as plain numbers without units or symbols.";

const DRAWDOWN_PROMPT: &str = "\
You extract planned outbound payments (drawdowns) from loan drawdown \
schedules.\n\
Return a single JSON object with one entry per payment row in the table.\n\
Copy invoice numbers, variable symbols and IBANs character for character; \
never guess digits that are not legible.\n\
Amounts use a dot as the decimal separator; strip currency symbols and \
thousands separators.\n\
Do not skip rows, and do not invent rows that are not in the table.";

/// Extra character-exactness rules for the two-pass verified drawdown
/// branch.
const DRAWDOWN_VERIFIED_RULES: &str = "\n\n\
CHARACTER-EXACT RULES:\n\
- Slovak (SK) and Czech (CZ) IBANs are exactly 24 characters long: two \
letters, two check digits, twenty digits. Count the characters of every \
IBAN you return.\n\
- The invoice number and the variable symbol are different fields; never \
copy one into the other.\n\
- Amounts may be printed with spaces as thousands separators and a comma \
as the decimal separator; convert them to plain numbers with a dot \
decimal separator.\n\
- Prefer the OCR text for digit-exact fields and the page images for table \
layout and row/column association.";

/// Directive appended in OCR-enhanced mode.
pub const OCR_FUSION_DIRECTIVE: &str = "\n\n\
The OCR text accompanying each page is character-accurate: trust it for \
IBANs, invoice numbers and other digit-exact fields. Use the page image to \
resolve layout, table structure and which values belong together.";

fn default_prompt(doc_type: DocumentType) -> &'static str {
    match doc_type {
        DocumentType::Invoice => INVOICE_PROMPT,
        DocumentType::BankStatement => BANK_STATEMENT_PROMPT,
        DocumentType::LoanContract => LOAN_CONTRACT_PROMPT,
        DocumentType::Drawdown => DRAWDOWN_PROMPT,
    }
}

/// Build the instruction text for a request.
///
/// A custom prompt replaces the default entirely. A literal `{{schema}}`
/// token is substituted with the schema JSON exactly once (no recursive
/// expansion). When no token is present and `embed_schema` is set (schema
/// enforcement off, or a backend without structured output), a trailing
/// "adhere to this schema" clause is appended.
pub fn build_instructions(
    doc_type: DocumentType,
    custom_prompt: Option<&str>,
    schema: &Value,
    embed_schema: bool,
) -> String {
    let schema_json = serde_json::to_string_pretty(schema).unwrap_or_else(|_| "{}".to_string());

    if let Some(custom) = custom_prompt {
        if custom.contains(SCHEMA_TOKEN) {
            return custom.replacen(SCHEMA_TOKEN, &schema_json, 1);
        }
        if embed_schema {
            return format!("{custom}\n\nReturn a JSON object adhering to this schema:\n{schema_json}");
        }
        return custom.to_string();
    }

    let mut instructions = default_prompt(doc_type).to_string();
    if embed_schema {
        instructions.push_str("\n\nReturn a JSON object adhering to this schema:\n");
        instructions.push_str(&schema_json);
    }
    instructions
}

/// Instructions for the two-pass verified drawdown branch: the default
/// drawdown prompt extended with character-exactness rules.
pub fn verified_instructions(custom_prompt: Option<&str>, schema: &Value, embed_schema: bool) -> String {
    let mut instructions = build_instructions(DocumentType::Drawdown, custom_prompt, schema, embed_schema);
    instructions.push_str(DRAWDOWN_VERIFIED_RULES);
    instructions
}
