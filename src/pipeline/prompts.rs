//! Prompt construction for the pipeline agents.
//!
//! Pure functions, no I/O. Each prompt embeds its own output contract so the
//! agent runner can shape the response without per-stage parsing rules.

/// Prompt for the OCR cleanup stage. Output contract: plain text only.
pub fn cleanup_prompt(raw_ocr_text: &str) -> String {
    format!(
        r#"You are an expert OCR cleanup specialist for bank statements. Your task is to clean and fix the raw OCR text while preserving the original structure and layout.

RAW OCR TEXT:
```
{raw_ocr_text}
```

CLEANUP TASKS:

1. **Fix Common OCR Errors:**
   - Replace common character substitutions (l->1, O->0, S->5, etc.)
   - Fix broken words and spacing issues
   - Correct misread dates and numbers
   - Fix currency symbols and decimal points

2. **Preserve Structure:**
   - Maintain table alignment and columns
   - Keep transaction rows intact
   - Preserve headers and section labels
   - Keep date-description-amount groupings

3. **Remove Noise:**
   - Remove OCR artifacts (random characters, symbols)
   - Clean up extra whitespace while preserving alignment
   - Remove duplicate characters or lines
   - Fix line breaks that split data incorrectly

4. **Enhance Readability:**
   - Ensure dates are in consistent format
   - Align numbers properly
   - Separate sections clearly
   - Fix truncated or merged words

OUTPUT FORMAT:
Return ONLY the cleaned text. Do NOT add explanations or JSON. Just output the cleaned, structured text that maintains the original bank statement layout.

CRITICAL: Preserve all financial data (dates, amounts, descriptions) exactly - just fix the OCR errors. Do not modify or interpret the data.
"#
    )
}

/// Sample of the canonical extraction tree embedded in the extraction prompt.
fn extraction_sample() -> serde_json::Value {
    serde_json::json!({
        "account": {
            "account_number": {"value": "XXXX1234", "confidence": 0.92},
            "account_holder": {"value": "John Doe", "confidence": 0.87},
            "account_type": {"value": "Savings", "confidence": 0.85}
        },
        "period": {
            "start_date": {"value": "2025-01-01", "confidence": 0.95},
            "end_date": {"value": "2025-01-31", "confidence": 0.94}
        },
        "bank": {
            "bank_name": {"value": "Example Bank", "confidence": 0.98},
            "branch_name": {"value": "Main Branch", "confidence": 0.90},
            "currency": {"value": "BDT", "confidence": 0.99}
        },
        "balances": {
            "opening_balance": {"value": 17500.00, "confidence": 0.95},
            "closing_balance": {"value": 15000.00, "confidence": 0.95},
            "total_debits": {"value": 5500.00, "confidence": 0.92},
            "total_credits": {"value": 3000.00, "confidence": 0.91}
        },
        "schema_info": {
            "detected_columns": ["date", "description", "debit", "credit", "balance"],
            "column_mapping": {
                "date": "Date",
                "description": "Description/Particulars",
                "debit": "Withdrawal/Debit",
                "credit": "Deposit/Credit",
                "balance": "Balance"
            }
        },
        "transactions": [
            {
                "date": {"value": "2025-01-02", "confidence": 0.98},
                "description": {"value": "ATM Withdrawal", "confidence": 0.93},
                "debit": {"value": 2500.00, "confidence": 0.98},
                "credit": {"value": 0.00, "confidence": 0.98},
                "balance": {"value": 15000.00, "confidence": 0.90}
            }
        ]
    })
}

/// Prompt for the structured extraction stage. Output contract: one JSON
/// object following the canonical tree, with flexible per-bank columns.
pub fn extraction_prompt(cleaned_text: &str) -> String {
    let sample = serde_json::to_string_pretty(&extraction_sample())
        .expect("static sample serializes");

    format!(
        r#"You are an expert data extractor for bank statements. Extract structured information from the cleaned bank statement text into JSON format.

CLEANED BANK STATEMENT TEXT:
```
{cleaned_text}
```

EXTRACTION TASKS:

1. **Account Information:**
   - Account number (mask if needed: XXXX1234)
   - Account holder name
   - Account type (Savings, Current, etc.)

2. **Statement Period:**
   - Start date (convert to YYYY-MM-DD)
   - End date (convert to YYYY-MM-DD)

3. **Bank Information:**
   - Bank name
   - Branch name
   - Currency code (BDT, USD, EUR, etc.)

4. **Summary Balances:**
   - Opening balance
   - Closing balance
   - Total debits (sum of all withdrawals)
   - Total credits (sum of all deposits)

5. **Detect Transaction Table Schema (IMPORTANT):**
   First, identify the ACTUAL column headers in the transaction table:
   - Look for headers like: Date, Description, Particulars, Narration, Debit, Credit, Withdrawal, Deposit, Amount, Balance, Running Balance, etc.
   - Different banks use different column names - preserve the ORIGINAL structure
   - Some statements have: Date | Description | Debit | Credit | Balance
   - Others have: Date | Particulars | Withdrawal | Deposit | Running Balance
   - Others have: Date | Narration | Amount | Dr/Cr | Balance
   - Some have additional columns: Reference Number, Cheque Number, Value Date, etc.

6. **Extract Schema Information:**
   In "schema_info", record:
   - "detected_columns": List of column keys you'll use (normalized: date, description, debit, credit, balance, etc.)
   - "column_mapping": Map of your keys to the ORIGINAL column names found in the statement
   - "additional_columns": Any extra columns beyond the standard ones

7. **Extract All Transactions with FLEXIBLE schema:**
   For EACH transaction row, extract ALL available columns:
   - ALWAYS include: date, description (or whatever the bank calls it)
   - Include debit/credit/withdrawal/deposit (whatever columns exist)
   - Include balance if available
   - Include any additional columns (reference_number, cheque_number, value_date, etc.)
   - Store original column values even if they don't fit standard schema

8. **Confidence Scores:**
   For each field, provide confidence (0.0 to 1.0) based on:
   - Text clarity and readability
   - Format consistency
   - Data completeness

OUTPUT FORMAT:
Return ONLY valid JSON following this structure (adapt to actual columns found):

{sample}

JSON REQUIREMENTS:
- Use double quotes (") for all keys and string values
- Dates must be ISO 8601 format (YYYY-MM-DD)
- Amounts must be numbers (not strings)
- Include confidence for every field
- Include "schema_info" with detected columns and mapping
- In transactions, include ALL columns found (not just standard ones)
- Use 0.00 for missing numeric values
- Preserve original text exactly in descriptions

CRITICAL FLEXIBILITY:
- DO NOT force data into a rigid schema
- PRESERVE whatever columns the bank statement actually has
- Map column names to indicate what they represent
- Include ALL data, even unexpected columns

CRITICAL: Return ONLY the JSON object. No explanatory text before or after.
"#
    )
}

/// Prompt for the normalization/validation stage. Output contract:
/// `{normalized_data, validation_results}`.
pub fn normalization_prompt(extracted_data: &serde_json::Value) -> String {
    let extracted = serde_json::to_string_pretty(extracted_data)
        .unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"You are an expert data validator for bank statements. Normalize and validate the extracted data to ensure accuracy and consistency.

EXTRACTED DATA:
```json
{extracted}
```

NORMALIZATION & VALIDATION TASKS:

1. **Date Validation:**
   - Verify all dates are valid and in YYYY-MM-DD format
   - Check that transaction dates fall within statement period
   - Ensure chronological ordering
   - Flag dates that seem incorrect

2. **Amount Validation:**
   - Verify all amounts are valid numbers
   - Check that debits/credits are not both non-zero for same transaction
   - Validate that running balance calculations are correct
   - Verify opening + credits - debits = closing balance
   - Flag any mathematical inconsistencies

3. **Currency Consistency:**
   - Ensure single currency throughout
   - Standardize to ISO 4217 code (BDT, USD, EUR, etc.)

4. **Data Normalization:**
   - Standardize date formats to ISO 8601
   - Remove extra spaces from descriptions
   - Normalize currency symbols to codes
   - Clean up formatting inconsistencies

5. **Balance Verification:**
   - Recalculate running balances from opening balance
   - Flag discrepancies between stated and calculated balances
   - Verify total debits and credits match transaction sums

6. **Confidence Adjustment:**
   - Increase confidence for validated fields
   - Decrease confidence for fields with inconsistencies
   - Add validation flags for problematic fields

OUTPUT FORMAT:
Return JSON with normalized data and validation results:

```json
{{
  "normalized_data": {{
    "account": {{ ... }},
    "period": {{ ... }},
    "bank": {{ ... }},
    "balances": {{ ... }},
    "transactions": [ ... ]
  }},
  "validation_results": {{
    "balance_verification": {{
      "calculated_closing": 15000.00,
      "stated_closing": 15000.00,
      "matches": true,
      "confidence": 0.98
    }},
    "date_validation": {{
      "all_dates_valid": true,
      "chronological": true,
      "within_period": true,
      "confidence": 0.95
    }},
    "amount_validation": {{
      "all_amounts_valid": true,
      "running_balance_correct": true,
      "confidence": 0.93
    }},
    "issues": [],
    "overall_confidence": 0.94
  }}
}}
```

CRITICAL:
- Return ONLY valid JSON
- Include both normalized_data and validation_results
- Flag all issues in the "issues" array
- Provide overall confidence score (0.0 to 1.0)
"#
    )
}

/// Prompt for document-type classification. Output contract:
/// `{document_type, confidence, reasoning}`.
pub fn classification_prompt() -> String {
    r#"You are an expert document classifier. Analyze the provided document image and determine its type.

DOCUMENT TYPES:
1. bank_statement - Bank account statements showing transactions, balances, account details
2. invoice - Bills or invoices from vendors/suppliers with line items, totals, due dates
3. receipt - Purchase receipts with items, prices, payment information
4. generic - Any other document type (forms, letters, contracts, etc.)

CLASSIFICATION TASK:
- Analyze the visual layout, text content, and structure of the document
- Look for distinguishing features: transaction tables, line items, payment records, letterheads
- Choose exactly one document type from the list above

OUTPUT FORMAT:
Return ONLY valid JSON:

{
  "document_type": "bank_statement",
  "confidence": 0.95,
  "reasoning": "Document shows a transaction table with dates, debits, credits and running balances"
}

CRITICAL: Return ONLY the JSON object. No explanatory text before or after.
"#
    .to_string()
}
