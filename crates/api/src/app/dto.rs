use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use tally_core::CounterpartyId;
use tally_documents::{Document, DocumentHeader, DocumentKind, LineItem, LineItemInput};
use tally_infra::saga::NewDocument;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateDocumentRequest {
    pub kind: String,
    pub counterparty_id: String,
    pub issue_date: NaiveDate,
    /// Valid-until (quote), due date (invoice) or expected delivery (purchase order).
    pub secondary_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<LineItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct LineItemRequest {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub tax_rate: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: String,
}

impl CreateDocumentRequest {
    pub fn into_new_document(self) -> Result<NewDocument, axum::response::Response> {
        let kind = DocumentKind::parse(&self.kind).map_err(errors::domain_error_to_response)?;
        let counterparty_id: CounterpartyId = self.counterparty_id.parse().map_err(|_| {
            errors::json_error(
                axum::http::StatusCode::BAD_REQUEST,
                "validation_error",
                "invalid counterparty_id",
            )
        })?;

        let header = DocumentHeader {
            kind,
            counterparty_id,
            issue_date: self.issue_date,
            secondary_date: self.secondary_date,
            notes: self.notes,
        };
        let items = self
            .items
            .into_iter()
            .map(|l| LineItemInput::new(l.description, l.quantity, l.unit_price, l.tax_rate))
            .collect();
        Ok(NewDocument::computed(header, items))
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn document_to_json(doc: &Document) -> serde_json::Value {
    let payment = doc.payment.as_ref().map(|p| {
        serde_json::json!({
            "status": p.status.as_str(),
            "session_id": p.session_id,
            "checkout_url": p.checkout_url,
            "payment_reference": p.payment_reference,
            "paid_at": p.paid_at.map(|t| t.to_rfc3339()),
        })
    });

    serde_json::json!({
        "id": doc.id.to_string(),
        "kind": doc.kind.as_str(),
        "number": doc.number,
        "counterparty_id": doc.counterparty_id.to_string(),
        "issue_date": doc.issue_date.to_string(),
        "secondary_date": doc.secondary_date.map(|d| d.to_string()),
        "status": doc.status.as_str(),
        "subtotal": doc.totals.subtotal.to_string(),
        "tax": doc.totals.tax.to_string(),
        "total": doc.totals.total.to_string(),
        "notes": doc.notes,
        "payment": payment,
        "created_at": doc.created_at.to_rfc3339(),
        "updated_at": doc.updated_at.to_rfc3339(),
    })
}

pub fn document_with_items_to_json(doc: &Document, items: &[LineItem]) -> serde_json::Value {
    let mut body = document_to_json(doc);
    body["items"] = items
        .iter()
        .map(|l| {
            serde_json::json!({
                "position": l.position,
                "description": l.description,
                "quantity": l.quantity.to_string(),
                "unit_price": l.unit_price.to_string(),
                "tax_rate": l.tax_rate.to_string(),
                "line_total": l.line_total.map(|t| t.to_string()),
            })
        })
        .collect::<Vec<_>>()
        .into();
    body
}
