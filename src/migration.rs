//! Baseline schema for a freshly created tenant database.
//!
//! Steps run in version order inside one transaction and are recorded in
//! `_schema_migrations`, so a database that already carries the baseline is
//! left untouched.

use sqlx::{Connection, PgConnection};

pub struct BaselineStep {
    pub version: i64,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

const MIGRATIONS_TABLE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS _schema_migrations (
        version BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

pub const BASELINE: &[BaselineStep] = &[
    BaselineStep {
        version: 1,
        name: "users_and_teams",
        statements: &[
            r#"CREATE TABLE IF NOT EXISTS teams (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
            r#"CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                email TEXT NOT NULL UNIQUE,
                full_name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',
                team_id UUID REFERENCES teams (id) ON DELETE SET NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        ],
    },
    BaselineStep {
        version: 2,
        name: "sales_and_commissions",
        statements: &[
            r#"CREATE TABLE IF NOT EXISTS sales (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users (id),
                amount NUMERIC(14, 2) NOT NULL,
                closed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
            r#"CREATE TABLE IF NOT EXISTS commissions (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                sale_id UUID NOT NULL REFERENCES sales (id) ON DELETE CASCADE,
                user_id UUID NOT NULL REFERENCES users (id),
                amount NUMERIC(14, 2) NOT NULL,
                paid BOOLEAN NOT NULL DEFAULT FALSE
            )"#,
            "CREATE INDEX IF NOT EXISTS sales_user_id_idx ON sales (user_id)",
        ],
    },
    BaselineStep {
        version: 3,
        name: "notifications",
        statements: &[r#"CREATE TABLE IF NOT EXISTS notifications (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL REFERENCES users (id) ON DELETE CASCADE,
                body TEXT NOT NULL,
                read_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#],
    },
];

/// Apply every baseline step not yet recorded. Returns how many were applied.
pub async fn apply_baseline(conn: &mut PgConnection) -> Result<usize, sqlx::Error> {
    let mut tx = conn.begin().await?;
    sqlx::query(MIGRATIONS_TABLE_DDL).execute(&mut *tx).await?;

    let applied: Vec<(i64,)> = sqlx::query_as("SELECT version FROM _schema_migrations")
        .fetch_all(&mut *tx)
        .await?;
    let applied: Vec<i64> = applied.into_iter().map(|(v,)| v).collect();

    let mut count = 0;
    for step in pending_steps(&applied) {
        for sql in step.statements {
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO _schema_migrations (version, name) VALUES ($1, $2)")
            .bind(step.version)
            .bind(step.name)
            .execute(&mut *tx)
            .await?;
        count += 1;
    }
    tx.commit().await?;
    Ok(count)
}

fn pending_steps(applied: &[i64]) -> impl Iterator<Item = &'static BaselineStep> + '_ {
    BASELINE.iter().filter(move |s| !applied.contains(&s.version))
}
