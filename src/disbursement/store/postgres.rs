//! PostgreSQL store
//!
//! Runtime-checked `sqlx` queries. CAS updates and their history rows share
//! one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{DisbursementStore, StateVersion};
use crate::disbursement::error::DisbursementError;
use crate::disbursement::retry::FailureClass;
use crate::disbursement::state::{DisbursementStatus, Step, ValidationStatus};
use crate::disbursement::types::{
    Disbursement, DisbursementHistory, DisbursementId, NewDisbursement, NewValidation,
    RecipientValidation, ValidationHistory, ValidationId,
};
use crate::vendor::VendorId;

const VALIDATION_COLUMNS: &str = "id, vendor, bank_code, account_number, name_in_bank, \
     validated_name, status, reference_id, reason, attempt, created_at, updated_at";

const DISBURSEMENT_COLUMNS: &str = "id, validation_id, disbursement_type, external_id, amount, \
     original_amount, method, reference_id, idempotency_key, status, retry_times, \
     uncharged_retries, step, reason, vendor_reason, failure_class, next_retry_at, \
     excluded_vendor, archived, created_at, updated_at";

const HISTORY_COLUMNS: &str = "disbursement_id, step, status, retry_times, method, reference_id, \
     amount, reason, vendor_reason, changed_fields, note, created_at";

fn corrupt(what: &str, value: impl std::fmt::Display) -> DisbursementError {
    DisbursementError::DatabaseError(format!("unknown {} in row: {}", what, value))
}

fn parse_vendor(value: Option<String>) -> Result<Option<VendorId>, DisbursementError> {
    value
        .map(|s| s.parse::<VendorId>().map_err(|_| corrupt("vendor", &s)))
        .transpose()
}

fn parse_step(value: Option<i16>) -> Result<Option<Step>, DisbursementError> {
    value
        .map(|id| Step::from_id(id).ok_or_else(|| corrupt("step", id)))
        .transpose()
}

fn row_to_validation(row: &PgRow) -> Result<RecipientValidation, DisbursementError> {
    let status: i16 = row.try_get("status")?;
    let attempt: i32 = row.try_get("attempt")?;
    Ok(RecipientValidation {
        id: row.try_get("id")?,
        vendor: parse_vendor(row.try_get("vendor")?)?,
        bank_code: row.try_get("bank_code")?,
        account_number: row.try_get("account_number")?,
        name_in_bank: row.try_get("name_in_bank")?,
        validated_name: row.try_get("validated_name")?,
        status: ValidationStatus::from_id(status).ok_or_else(|| corrupt("validation status", status))?,
        reference_id: row.try_get("reference_id")?,
        reason: row.try_get("reason")?,
        attempt: attempt as u32,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_disbursement(row: &PgRow) -> Result<Disbursement, DisbursementError> {
    let status: i16 = row.try_get("status")?;
    let kind: String = row.try_get("disbursement_type")?;
    let retry_times: i32 = row.try_get("retry_times")?;
    let uncharged: i32 = row.try_get("uncharged_retries")?;
    let failure_class: Option<i16> = row.try_get("failure_class")?;
    Ok(Disbursement {
        id: row.try_get("id")?,
        validation_id: row.try_get("validation_id")?,
        disbursement_type: kind.parse().map_err(|_| corrupt("disbursement type", &kind))?,
        external_id: row.try_get("external_id")?,
        amount: row.try_get("amount")?,
        original_amount: row.try_get("original_amount")?,
        method: parse_vendor(row.try_get("method")?)?,
        reference_id: row.try_get("reference_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        status: DisbursementStatus::from_id(status).ok_or_else(|| corrupt("status", status))?,
        retry_times: retry_times as u32,
        uncharged_retries: uncharged as u32,
        step: parse_step(row.try_get("step")?)?,
        reason: row.try_get("reason")?,
        vendor_reason: row.try_get("vendor_reason")?,
        failure_class: failure_class
            .map(|id| FailureClass::from_id(id).ok_or_else(|| corrupt("failure class", id)))
            .transpose()?,
        next_retry_at: row.try_get("next_retry_at")?,
        excluded_vendor: parse_vendor(row.try_get("excluded_vendor")?)?,
        archived: row.try_get("archived")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_history(row: &PgRow) -> Result<DisbursementHistory, DisbursementError> {
    let status: i16 = row.try_get("status")?;
    let retry_times: i32 = row.try_get("retry_times")?;
    let amount: Decimal = row.try_get("amount")?;
    Ok(DisbursementHistory {
        disbursement_id: row.try_get("disbursement_id")?,
        step: parse_step(row.try_get("step")?)?,
        status: DisbursementStatus::from_id(status).ok_or_else(|| corrupt("status", status))?,
        retry_times: retry_times as u32,
        method: parse_vendor(row.try_get("method")?)?,
        reference_id: row.try_get("reference_id")?,
        amount,
        reason: row.try_get("reason")?,
        vendor_reason: row.try_get("vendor_reason")?,
        changed_fields: row.try_get("changed_fields")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    h: &DisbursementHistory,
) -> Result<(), DisbursementError> {
    sqlx::query(&format!(
        "INSERT INTO disbursement_history_tb ({}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        HISTORY_COLUMNS
    ))
    .bind(h.disbursement_id)
    .bind(h.step.map(|s| s.id()))
    .bind(h.status.id())
    .bind(h.retry_times as i32)
    .bind(h.method.map(|m| m.as_str()))
    .bind(&h.reference_id)
    .bind(h.amount)
    .bind(&h.reason)
    .bind(&h.vendor_reason)
    .bind(&h.changed_fields)
    .bind(&h.note)
    .bind(h.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "23505")
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_disbursements(
        &self,
        filter: &str,
        status: DisbursementStatus,
        at: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM disbursements_tb WHERE status = $1 AND archived = FALSE AND {} \
             ORDER BY updated_at, id LIMIT $3",
            DISBURSEMENT_COLUMNS, filter
        ))
        .bind(status.id())
        .bind(at)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_disbursement).collect()
    }
}

#[async_trait]
impl DisbursementStore for PgStore {
    async fn insert_validation(
        &self,
        new: NewValidation,
    ) -> Result<RecipientValidation, DisbursementError> {
        let row = sqlx::query(&format!(
            "INSERT INTO recipient_validations_tb (bank_code, account_number, name_in_bank, status) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            VALIDATION_COLUMNS
        ))
        .bind(&new.bank_code)
        .bind(&new.account_number)
        .bind(&new.name_in_bank)
        .bind(ValidationStatus::Initiated.id())
        .fetch_one(&self.pool)
        .await?;
        row_to_validation(&row)
    }

    async fn get_validation(
        &self,
        id: ValidationId,
    ) -> Result<Option<RecipientValidation>, DisbursementError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM recipient_validations_tb WHERE id = $1",
            VALIDATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_validation).transpose()
    }

    async fn find_validation_by_reference(
        &self,
        vendor: VendorId,
        reference_id: &str,
    ) -> Result<Option<RecipientValidation>, DisbursementError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM recipient_validations_tb WHERE vendor = $1 AND reference_id = $2",
            VALIDATION_COLUMNS
        ))
        .bind(vendor.as_str())
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_validation).transpose()
    }

    async fn save_validation(
        &self,
        v: &RecipientValidation,
        history: &[ValidationHistory],
    ) -> Result<(), DisbursementError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE recipient_validations_tb
            SET vendor = $2, bank_code = $3, account_number = $4, name_in_bank = $5,
                validated_name = $6, status = $7, reference_id = $8, reason = $9,
                attempt = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(v.id)
        .bind(v.vendor.map(|m| m.as_str()))
        .bind(&v.bank_code)
        .bind(&v.account_number)
        .bind(&v.name_in_bank)
        .bind(&v.validated_name)
        .bind(v.status.id())
        .bind(&v.reference_id)
        .bind(&v.reason)
        .bind(v.attempt as i32)
        .bind(v.updated_at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DisbursementError::ValidationNotFound(v.id));
        }

        for h in history {
            sqlx::query(
                r#"
                INSERT INTO recipient_validation_history_tb
                    (validation_id, field, old_value, new_value, note, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(h.validation_id)
            .bind(&h.field)
            .bind(&h.old_value)
            .bind(&h.new_value)
            .bind(&h.note)
            .bind(h.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn validation_history(
        &self,
        id: ValidationId,
    ) -> Result<Vec<ValidationHistory>, DisbursementError> {
        let rows = sqlx::query(
            r#"
            SELECT validation_id, field, old_value, new_value, note, created_at
            FROM recipient_validation_history_tb
            WHERE validation_id = $1
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ValidationHistory {
                    validation_id: row.try_get("validation_id")?,
                    field: row.try_get("field")?,
                    old_value: row.try_get("old_value")?,
                    new_value: row.try_get("new_value")?,
                    note: row.try_get("note")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn insert_disbursement(
        &self,
        new: NewDisbursement,
    ) -> Result<Disbursement, DisbursementError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "INSERT INTO disbursements_tb \
                (validation_id, disbursement_type, external_id, amount, original_amount, status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            DISBURSEMENT_COLUMNS
        ))
        .bind(new.validation_id)
        .bind(new.disbursement_type.as_str())
        .bind(&new.external_id)
        .bind(new.amount)
        .bind(new.original_amount)
        .bind(DisbursementStatus::Initiated.id())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DisbursementError::ExternalIdConflict(new.external_id.clone())
            } else {
                DisbursementError::from(e)
            }
        })?;
        let disbursement = row_to_disbursement(&row)?;
        insert_history(&mut tx, &DisbursementHistory::snapshot(&disbursement, None, None)).await?;
        tx.commit().await?;
        Ok(disbursement)
    }

    async fn get_disbursement(
        &self,
        id: DisbursementId,
    ) -> Result<Option<Disbursement>, DisbursementError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM disbursements_tb WHERE id = $1",
            DISBURSEMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_disbursement).transpose()
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Disbursement>, DisbursementError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM disbursements_tb WHERE external_id = $1",
            DISBURSEMENT_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_disbursement).transpose()
    }

    async fn find_by_reference(
        &self,
        vendor: VendorId,
        reference: &str,
    ) -> Result<Option<Disbursement>, DisbursementError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM disbursements_tb \
             WHERE method = $1 AND (reference_id = $2 OR idempotency_key = $2) \
             ORDER BY id DESC LIMIT 1",
            DISBURSEMENT_COLUMNS
        ))
        .bind(vendor.as_str())
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_disbursement).transpose()
    }

    async fn update_disbursement(
        &self,
        d: &Disbursement,
        expected: StateVersion,
        history: &[DisbursementHistory],
    ) -> Result<bool, DisbursementError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE disbursements_tb
            SET amount = $2, original_amount = $3, method = $4, reference_id = $5,
                idempotency_key = $6, status = $7, retry_times = $8, uncharged_retries = $9,
                step = $10, reason = $11, vendor_reason = $12, failure_class = $13,
                next_retry_at = $14, excluded_vendor = $15, archived = $16, updated_at = $17
            WHERE id = $1
              AND status = $18
              AND retry_times = $19
              AND step IS NOT DISTINCT FROM $20
            "#,
        )
        .bind(d.id)
        .bind(d.amount)
        .bind(d.original_amount)
        .bind(d.method.map(|m| m.as_str()))
        .bind(&d.reference_id)
        .bind(&d.idempotency_key)
        .bind(d.status.id())
        .bind(d.retry_times as i32)
        .bind(d.uncharged_retries as i32)
        .bind(d.step.map(|s| s.id()))
        .bind(&d.reason)
        .bind(&d.vendor_reason)
        .bind(d.failure_class.map(|c| c.id()))
        .bind(d.next_retry_at)
        .bind(d.excluded_vendor.map(|v| v.as_str()))
        .bind(d.archived)
        .bind(d.updated_at)
        .bind(expected.status.id())
        .bind(expected.retry_times as i32)
        .bind(expected.step.map(|s| s.id()))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        for h in history {
            insert_history(&mut tx, h).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn disbursement_history(
        &self,
        id: DisbursementId,
    ) -> Result<Vec<DisbursementHistory>, DisbursementError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM disbursement_history_tb WHERE disbursement_id = $1 ORDER BY id",
            HISTORY_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_history).collect()
    }

    async fn latest_step_history(
        &self,
        id: DisbursementId,
        step: Step,
    ) -> Result<Option<DisbursementHistory>, DisbursementError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM disbursement_history_tb \
             WHERE disbursement_id = $1 AND step = $2 ORDER BY id DESC LIMIT 1",
            HISTORY_COLUMNS
        ))
        .bind(id)
        .bind(step.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_history).transpose()
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError> {
        self.fetch_disbursements("next_retry_at <= $2", DisbursementStatus::Failed, now, limit)
            .await
    }

    async fn find_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError> {
        self.fetch_disbursements("updated_at < $2", DisbursementStatus::Pending, older_than, limit)
            .await
    }

    async fn find_stale_initiated(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Disbursement>, DisbursementError> {
        self.fetch_disbursements(
            &format!(
                "(idempotency_key IS NOT NULL OR step = {}) AND updated_at < $2",
                Step::External.id()
            ),
            DisbursementStatus::Initiated,
            older_than,
            limit,
        )
        .await
    }
}
