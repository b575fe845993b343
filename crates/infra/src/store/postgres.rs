//! Postgres-backed document store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Colliding document number |
//! | Database (foreign key violation) | `23503` | `Backend` | Unknown counterparty or document |
//! | Database (check constraint violation) | `23514` | `Backend` | Out-of-range line values |
//! | RowNotFound | N/A | `NotFound` | `fetch_one` on a missing row |
//! | Other | N/A | `Backend` | Pool, network, decoding |
//!
//! Every header mutation is one `UPDATE ... WHERE <guard>` statement and
//! reports whether a row matched.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use tally_core::{CounterpartyId, DocumentId, LineItemId, OwnerId};
use tally_documents::{
    Counterparty, CounterpartyRole, Document, DocumentKind, DocumentStatus, InvoiceStatus,
    LineItem, MerchantProfile, PaymentRecord, PaymentStatus, Totals,
};

use super::{CheckoutLink, DocumentStore, OverdueMark, PaidUpdate, StoreError, StoreResult};

const SCHEMA: &str = include_str!("../../migrations/0001_documents.sql");

const DOCUMENT_COLUMNS: &str = r#"
    id, owner_id, kind, number, counterparty_id, issue_date, secondary_date, status,
    subtotal, tax, total, notes,
    payment_account_id, payment_session_id, checkout_url, payment_reference,
    payment_status, paid_at, deleted_at, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the bundled schema. Every statement is `IF NOT EXISTS`.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    #[instrument(skip(self, counterparty), fields(counterparty_id = %counterparty.id), err)]
    pub async fn upsert_counterparty(&self, counterparty: &Counterparty) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO counterparties (id, owner_id, name, email, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
               SET name = EXCLUDED.name, email = EXCLUDED.email, role = EXCLUDED.role
            "#,
        )
        .bind(counterparty.id.as_uuid())
        .bind(counterparty.owner_id.as_uuid())
        .bind(&counterparty.name)
        .bind(&counterparty.email)
        .bind(counterparty.role.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_counterparty", e))?;
        Ok(())
    }

    #[instrument(skip(self, profile), fields(owner_id = %profile.owner_id), err)]
    pub async fn upsert_merchant_profile(&self, profile: &MerchantProfile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO merchant_profiles
                (owner_id, currency, connected_account_id, charges_enabled, notification_email)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (owner_id) DO UPDATE
               SET currency = EXCLUDED.currency,
                   connected_account_id = EXCLUDED.connected_account_id,
                   charges_enabled = EXCLUDED.charges_enabled,
                   notification_email = EXCLUDED.notification_email
            "#,
        )
        .bind(profile.owner_id.as_uuid())
        .bind(&profile.currency)
        .bind(&profile.connected_account_id)
        .bind(profile.charges_enabled)
        .bind(&profile.notification_email)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_merchant_profile", e))?;
        Ok(())
    }

    async fn fetch_documents(
        &self,
        operation: &'static str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> StoreResult<Vec<Document>> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        rows.iter().map(document_from_row).collect()
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self), fields(counterparty_id = %id), err)]
    async fn find_counterparty(&self, id: CounterpartyId) -> StoreResult<Option<Counterparty>> {
        let row = sqlx::query(
            "SELECT id, owner_id, name, email, role FROM counterparties WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_counterparty", e))?;

        row.map(|row| {
            let role = match row.try_get::<String, _>("role").map_err(decode_error)?.as_str() {
                "client" => CounterpartyRole::Client,
                "supplier" => CounterpartyRole::Supplier,
                other => return Err(StoreError::Backend(format!("unknown counterparty role: {other}"))),
            };
            Ok(Counterparty {
                id: CounterpartyId::from_uuid(row.try_get("id").map_err(decode_error)?),
                owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(decode_error)?),
                name: row.try_get("name").map_err(decode_error)?,
                email: row.try_get("email").map_err(decode_error)?,
                role,
            })
        })
        .transpose()
    }

    #[instrument(skip(self), fields(owner_id = %owner_id), err)]
    async fn merchant_profile(&self, owner_id: OwnerId) -> StoreResult<Option<MerchantProfile>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, currency, connected_account_id, charges_enabled, notification_email
            FROM merchant_profiles
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("merchant_profile", e))?;

        row.map(|row| {
            Ok(MerchantProfile {
                owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(decode_error)?),
                currency: row.try_get("currency").map_err(decode_error)?,
                connected_account_id: row.try_get("connected_account_id").map_err(decode_error)?,
                charges_enabled: row.try_get("charges_enabled").map_err(decode_error)?,
                notification_email: row.try_get("notification_email").map_err(decode_error)?,
            })
        })
        .transpose()
    }

    #[instrument(
        skip(self, document),
        fields(document_id = %document.id, owner_id = %document.owner_id, number = %document.number),
        err
    )]
    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        let payment = document.payment.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO documents (
                id, owner_id, kind, number, counterparty_id, issue_date, secondary_date, status,
                subtotal, tax, total, notes,
                payment_account_id, payment_session_id, checkout_url, payment_reference,
                payment_status, paid_at, deleted_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(document.id.as_uuid())
        .bind(document.owner_id.as_uuid())
        .bind(document.kind.as_str())
        .bind(&document.number)
        .bind(document.counterparty_id.as_uuid())
        .bind(document.issue_date)
        .bind(document.secondary_date)
        .bind(document.status.as_str())
        .bind(document.totals.subtotal)
        .bind(document.totals.tax)
        .bind(document.totals.total)
        .bind(&document.notes)
        .bind(payment.account_id)
        .bind(payment.session_id)
        .bind(payment.checkout_url)
        .bind(payment.payment_reference)
        .bind(payment_status_column(payment.status))
        .bind(payment.paid_at)
        .bind(document.deleted_at)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;
        Ok(())
    }

    #[instrument(skip(self, items), fields(item_count = items.len()), err)]
    async fn insert_line_items(&self, items: &[LineItem]) -> StoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO line_items \
             (id, document_id, position, description, quantity, unit_price, tax_rate, line_total) ",
        );
        builder.push_values(items, |mut row, item| {
            row.push_bind(item.id.as_uuid())
                .push_bind(item.document_id.as_uuid())
                .push_bind(item.position as i32)
                .push_bind(item.description.clone())
                .push_bind(item.quantity)
                .push_bind(item.unit_price)
                .push_bind(item.tax_rate)
                .push_bind(item.line_total);
        });

        builder
            .build()
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_line_items", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(document_id = %id), err)]
    async fn delete_document(&self, id: DocumentId) -> StoreResult<()> {
        // line_items cascade.
        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_document", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(document_id = %id), err)]
    async fn get_document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_document", e))?;
        row.as_ref().map(document_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_document_by_session(&self, session_id: &str) -> StoreResult<Option<Document>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE payment_session_id = $1 LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_document_by_session", e))?;
        row.as_ref().map(document_from_row).transpose()
    }

    #[instrument(skip(self), fields(document_id = %document_id), err)]
    async fn list_line_items(&self, document_id: DocumentId) -> StoreResult<Vec<LineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, position, description, quantity, unit_price, tax_rate, line_total
            FROM line_items
            WHERE document_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(document_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_line_items", e))?;

        rows.iter().map(line_item_from_row).collect()
    }

    #[instrument(skip(self, link), fields(document_id = %id, session_id = %link.session_id), err)]
    async fn record_checkout_session(
        &self,
        id: DocumentId,
        link: &CheckoutLink,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
               SET payment_account_id = $2,
                   payment_session_id = $3,
                   checkout_url = $4,
                   payment_status = 'pending',
                   updated_at = $5
             WHERE id = $1
               AND kind = 'invoice'
               AND payment_status IS DISTINCT FROM 'paid'
            "#,
        )
        .bind(id.as_uuid())
        .bind(&link.account_id)
        .bind(&link.session_id)
        .bind(&link.checkout_url)
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_checkout_session", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, update), fields(document_id = %id), err)]
    async fn mark_paid(&self, id: DocumentId, update: &PaidUpdate) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
               SET status = $2,
                   payment_status = 'paid',
                   paid_at = $3,
                   payment_reference = $4,
                   updated_at = $3
             WHERE id = $1
               AND kind = 'invoice'
               AND payment_status IS DISTINCT FROM 'paid'
            "#,
        )
        .bind(id.as_uuid())
        .bind(InvoiceStatus::Paid.as_str())
        .bind(update.paid_at)
        .bind(&update.payment_reference)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_paid", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(document_id = %id, from = %expected, to = %next), err)]
    async fn update_status(
        &self,
        id: DocumentId,
        expected: DocumentStatus,
        next: DocumentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
               SET status = $3, updated_at = $4
             WHERE id = $1 AND kind = $5 AND status = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(at)
        .bind(expected.kind().as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, today = %today), err)]
    async fn find_overdue_candidates(
        &self,
        owner_id: OwnerId,
        today: NaiveDate,
    ) -> StoreResult<Vec<Document>> {
        let sql = format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
              FROM documents
             WHERE owner_id = $1
               AND kind = 'invoice'
               AND status = 'issued'
               AND secondary_date < $2
               AND deleted_at IS NULL
             ORDER BY number ASC
            "#
        );
        let query = sqlx::query(&sql).bind(owner_id.as_uuid()).bind(today);
        self.fetch_documents("find_overdue_candidates", query).await
    }

    #[instrument(skip(self, ids), fields(owner_id = %owner_id, candidates = ids.len()), err)]
    async fn mark_overdue(
        &self,
        owner_id: OwnerId,
        ids: &[DocumentId],
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<OverdueMark>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            UPDATE documents
               SET status = 'overdue', updated_at = $3
             WHERE owner_id = $1
               AND id = ANY($2)
               AND kind = 'invoice'
               AND status = 'issued'
               AND deleted_at IS NULL
            RETURNING id, number
            "#,
        )
        .bind(owner_id.as_uuid())
        .bind(&ids)
        .bind(at)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_overdue", e))?;

        let mut marked = rows
            .iter()
            .map(|row| {
                Ok(OverdueMark {
                    id: DocumentId::from_uuid(row.try_get("id").map_err(decode_error)?),
                    number: row.try_get("number").map_err(decode_error)?,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        marked.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(marked)
    }
}

fn payment_status_column(status: PaymentStatus) -> Option<&'static str> {
    match status {
        PaymentStatus::Unset => None,
        other => Some(other.as_str()),
    }
}

fn document_from_row(row: &PgRow) -> StoreResult<Document> {
    let kind_raw: String = row.try_get("kind").map_err(decode_error)?;
    let kind = DocumentKind::parse(&kind_raw).map_err(|e| StoreError::Backend(e.to_string()))?;
    let status_raw: String = row.try_get("status").map_err(decode_error)?;
    let status =
        DocumentStatus::parse(kind, &status_raw).map_err(|e| StoreError::Backend(e.to_string()))?;

    let payment = if kind == DocumentKind::Invoice {
        let status_raw: Option<String> = row.try_get("payment_status").map_err(decode_error)?;
        Some(PaymentRecord {
            account_id: row.try_get("payment_account_id").map_err(decode_error)?,
            session_id: row.try_get("payment_session_id").map_err(decode_error)?,
            checkout_url: row.try_get("checkout_url").map_err(decode_error)?,
            payment_reference: row.try_get("payment_reference").map_err(decode_error)?,
            status: PaymentStatus::parse(status_raw.as_deref())
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            paid_at: row.try_get("paid_at").map_err(decode_error)?,
        })
    } else {
        None
    };

    Ok(Document {
        id: DocumentId::from_uuid(row.try_get("id").map_err(decode_error)?),
        owner_id: OwnerId::from_uuid(row.try_get("owner_id").map_err(decode_error)?),
        kind,
        number: row.try_get("number").map_err(decode_error)?,
        counterparty_id: CounterpartyId::from_uuid(
            row.try_get("counterparty_id").map_err(decode_error)?,
        ),
        issue_date: row.try_get("issue_date").map_err(decode_error)?,
        secondary_date: row.try_get("secondary_date").map_err(decode_error)?,
        status,
        totals: Totals {
            subtotal: row.try_get::<Decimal, _>("subtotal").map_err(decode_error)?,
            tax: row.try_get::<Decimal, _>("tax").map_err(decode_error)?,
            total: row.try_get::<Decimal, _>("total").map_err(decode_error)?,
        },
        notes: row.try_get("notes").map_err(decode_error)?,
        payment,
        deleted_at: row.try_get("deleted_at").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn line_item_from_row(row: &PgRow) -> StoreResult<LineItem> {
    let position: i32 = row.try_get("position").map_err(decode_error)?;
    Ok(LineItem {
        id: LineItemId::from_uuid(row.try_get("id").map_err(decode_error)?),
        document_id: DocumentId::from_uuid(row.try_get("document_id").map_err(decode_error)?),
        position: u32::try_from(position)
            .map_err(|_| StoreError::Backend(format!("negative line position {position}")))?,
        description: row.try_get("description").map_err(decode_error)?,
        quantity: row.try_get("quantity").map_err(decode_error)?,
        unit_price: row.try_get("unit_price").map_err(decode_error)?,
        tax_rate: row.try_get("tax_rate").map_err(decode_error)?,
        line_total: row.try_get("line_total").map_err(decode_error)?,
    })
}

fn decode_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("failed to decode row: {err}"))
}

/// Map SQLx errors to `StoreError`, keeping unique violations distinguishable.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("no row in {operation}")),
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
