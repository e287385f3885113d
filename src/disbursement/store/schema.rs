//! PostgreSQL schema
//!
//! State columns are SMALLINT ids (see `state.rs`). Amounts are NUMERIC.
//! History tables are append-only.

use sqlx::PgPool;

pub const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS recipient_validations_tb (
        id              BIGSERIAL PRIMARY KEY,
        vendor          VARCHAR(32),
        bank_code       VARCHAR(32)  NOT NULL,
        account_number  VARCHAR(64)  NOT NULL,
        name_in_bank    VARCHAR(255) NOT NULL,
        validated_name  VARCHAR(255),
        status          SMALLINT     NOT NULL DEFAULT 0,
        reference_id    VARCHAR(128),
        reason          TEXT,
        attempt         INTEGER      NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ  NOT NULL DEFAULT NOW(),
        updated_at      TIMESTAMPTZ  NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_validations_reference
        ON recipient_validations_tb (vendor, reference_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS recipient_validation_history_tb (
        id              BIGSERIAL PRIMARY KEY,
        validation_id   BIGINT       NOT NULL REFERENCES recipient_validations_tb (id),
        field           VARCHAR(64)  NOT NULL,
        old_value       TEXT,
        new_value       TEXT,
        note            TEXT,
        created_at      TIMESTAMPTZ  NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS disbursements_tb (
        id                 BIGSERIAL PRIMARY KEY,
        validation_id      BIGINT        NOT NULL REFERENCES recipient_validations_tb (id),
        disbursement_type  VARCHAR(16)   NOT NULL,
        external_id        VARCHAR(128)  NOT NULL UNIQUE,
        amount             NUMERIC(20,2) NOT NULL,
        original_amount    NUMERIC(20,2) NOT NULL,
        method             VARCHAR(32),
        reference_id       VARCHAR(128),
        idempotency_key    VARCHAR(160),
        status             SMALLINT      NOT NULL DEFAULT 0,
        retry_times        INTEGER       NOT NULL DEFAULT 0,
        uncharged_retries  INTEGER       NOT NULL DEFAULT 0,
        step               SMALLINT,
        reason             TEXT,
        vendor_reason      TEXT,
        failure_class      SMALLINT,
        next_retry_at      TIMESTAMPTZ,
        excluded_vendor    VARCHAR(32),
        archived           BOOLEAN       NOT NULL DEFAULT FALSE,
        created_at         TIMESTAMPTZ   NOT NULL DEFAULT NOW(),
        updated_at         TIMESTAMPTZ   NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_disbursements_reference
        ON disbursements_tb (method, reference_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_disbursements_key
        ON disbursements_tb (method, idempotency_key)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_disbursements_open
        ON disbursements_tb (status, updated_at) WHERE archived = FALSE
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS disbursement_history_tb (
        id               BIGSERIAL PRIMARY KEY,
        disbursement_id  BIGINT        NOT NULL REFERENCES disbursements_tb (id),
        step             SMALLINT,
        status           SMALLINT      NOT NULL,
        retry_times      INTEGER       NOT NULL,
        method           VARCHAR(32),
        reference_id     VARCHAR(128),
        amount           NUMERIC(20,2) NOT NULL,
        reason           TEXT,
        vendor_reason    TEXT,
        changed_fields   TEXT[]        NOT NULL DEFAULT '{}',
        note             TEXT,
        created_at       TIMESTAMPTZ   NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_disbursement_history_step
        ON disbursement_history_tb (disbursement_id, step, id DESC)
    "#,
];

/// Create tables and indexes if missing
pub async fn bootstrap(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in CREATE_TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Disbursement schema ready");
    Ok(())
}
