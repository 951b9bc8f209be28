//! The extraction instruction sent with every invoice image.
//!
//! The prompt is fixed: it pins the JSON schema the response parser expects.
//! Keeping it here lets unit tests check the contract without a model.

/// JSON keys the model is asked to emit, in spreadsheet column order.
pub const FIELD_KEYS: [&str; 6] = ["fournisseur", "date", "HT", "TVA", "TTC", "devise"];

/// Instruction combined with the image in the single user message.
pub const EXTRACTION_PROMPT: &str = r#"Analyse cette image de facture ou de ticket de caisse.
Analyse this invoice or receipt image.

Extrais UNIQUEMENT les informations suivantes au format JSON pur.
Extract ONLY the following fields as a pure JSON object:

{
    "fournisseur": "nom de l'entreprise / supplier name",
    "date": "JJ/MM/AAAA",
    "HT": 0.0,
    "TVA": 0.0,
    "TTC": 0.0,
    "devise": "XOF/EUR/USD"
}

Rules:
- Use exactly these six keys, nothing more.
- HT (net), TVA (tax) and TTC (gross) are bare numbers with a dot as decimal
  separator: no quotes, no currency symbol, no thousands separator.
- If there is no tax line, use 0 for TVA and the total for both HT and TTC.
- devise is a 3-letter currency code (FCFA is XOF).
- Ne réponds rien d'autre que le JSON. Reply with the JSON object only:
  no explanation, no markdown code fences."#;
