use chrono::Utc;
use tracing::instrument;

use tally_core::{DocumentId, OwnerId};
use tally_documents::{DocumentKind, plan_invoice_from_quote};

use super::DocumentServices;
use crate::error::{ServiceError, ServiceResult};
use crate::saga::{CreatedDocument, NewDocument, TotalsSource};

impl DocumentServices {
    /// Turn an accepted quote into a new draft invoice.
    ///
    /// The quote is left untouched. The invoice is created through the same
    /// saga as any other document, with the quote's totals carried over.
    #[instrument(skip(self), fields(owner_id = %owner_id, quote_id = %quote_id), err)]
    pub async fn convert_quote(
        &self,
        owner_id: OwnerId,
        quote_id: DocumentId,
    ) -> ServiceResult<CreatedDocument> {
        let quote = self.load_owned(owner_id, quote_id, "convert_quote").await?;
        if quote.kind != DocumentKind::Quote {
            return Err(ServiceError::validation(format!(
                "document {} is a {}, not a quote",
                quote.number, quote.kind
            )));
        }

        let items = self
            .store
            .list_line_items(quote_id)
            .await
            .map_err(|e| ServiceError::upstream("list_line_items", e))?;

        let now = Utc::now();
        let plan = plan_invoice_from_quote(
            &quote,
            &items,
            now.date_naive(),
            self.settings.payment_terms_days,
        )?;

        let created = self
            .creation_saga()
            .run(
                owner_id,
                NewDocument {
                    header: plan.header,
                    items: plan.items,
                    totals: TotalsSource::CarriedOver(plan.totals),
                },
                now,
            )
            .await?;

        tracing::info!(
            quote_number = %quote.number,
            invoice_number = %created.document.number,
            "quote converted to invoice"
        );
        Ok(created)
    }
}
