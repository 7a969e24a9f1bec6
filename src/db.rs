// src/db.rs - Database schema and setup

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use strum::VariantNames;

use crate::auth::UserRole;
use crate::models::{
    AdmissionStatus, AppointmentStatus, BedStatus, BillStatus, DoctorStatus, LabOrderStatus,
    LabPriority, RequestPriority, RequestStatus, TicketPriority, TicketStatus, VisitStatus,
    DOSAGE_FORMS, GENDERS, PAYMENT_METHODS, WARD_TYPES,
};

/// `'a', 'b', 'c'` for CHECK(... IN (...)) clauses.
fn sql_list(values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Columns every resource table carries.
const AUDIT_COLUMNS: &str = "created_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL";

fn schema() -> Vec<(&'static str, String)> {
    vec![
        (
            "users",
            format!(
                r#"CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE CHECK(length(username) >= 3 AND length(username) <= 50),
            email TEXT NOT NULL UNIQUE CHECK(length(email) >= 5 AND length(email) <= 255),
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'receptionist' CHECK(role IN ({roles})),
            full_name TEXT,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            failed_login_attempts INTEGER NOT NULL DEFAULT 0,
            locked_until TEXT,
            last_login TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
                roles = sql_list(UserRole::VARIANTS)
            ),
        ),
        (
            "insurance_organizations",
            format!(
                r#"CREATE TABLE IF NOT EXISTS insurance_organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            code TEXT NOT NULL UNIQUE,
            contact_person TEXT,
            phone TEXT,
            email TEXT,
            address TEXT,
            coverage_percent REAL NOT NULL DEFAULT 0 CHECK(coverage_percent >= 0 AND coverage_percent <= 100),
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            {AUDIT_COLUMNS}
        )"#
            ),
        ),
        (
            "patients",
            format!(
                r#"CREATE TABLE IF NOT EXISTS patients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            gender TEXT NOT NULL CHECK(gender IN ({genders})),
            date_of_birth TEXT,
            phone TEXT,
            email TEXT,
            address TEXT,
            blood_group TEXT,
            emergency_contact TEXT,
            insurance_id TEXT REFERENCES insurance_organizations (id),
            insurance_number TEXT,
            notes TEXT,
            {AUDIT_COLUMNS}
        )"#,
                genders = sql_list(GENDERS)
            ),
        ),
        (
            "doctors",
            format!(
                r#"CREATE TABLE IF NOT EXISTS doctors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            department TEXT NOT NULL,
            specialization TEXT,
            phone TEXT,
            email TEXT,
            license_number TEXT UNIQUE,
            consultation_fee REAL NOT NULL DEFAULT 0 CHECK(consultation_fee >= 0),
            status TEXT NOT NULL DEFAULT 'available' CHECK(status IN ({statuses})),
            {AUDIT_COLUMNS}
        )"#,
                statuses = sql_list(DoctorStatus::VARIANTS)
            ),
        ),
        (
            "appointments",
            format!(
                r#"CREATE TABLE IF NOT EXISTS appointments (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients (id),
            doctor_id TEXT NOT NULL REFERENCES doctors (id),
            appointment_date TEXT NOT NULL,
            appointment_time TEXT,
            reason TEXT,
            status TEXT NOT NULL DEFAULT 'scheduled' CHECK(status IN ({statuses})),
            fee REAL NOT NULL DEFAULT 0 CHECK(fee >= 0),
            notes TEXT,
            completed_at TEXT,
            {AUDIT_COLUMNS}
        )"#,
                statuses = sql_list(AppointmentStatus::VARIANTS)
            ),
        ),
        (
            "wards",
            format!(
                r#"CREATE TABLE IF NOT EXISTS wards (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 255),
            ward_type TEXT NOT NULL CHECK(ward_type IN ({types})),
            floor TEXT,
            daily_rate REAL NOT NULL DEFAULT 0 CHECK(daily_rate >= 0),
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            {AUDIT_COLUMNS}
        )"#,
                types = sql_list(WARD_TYPES)
            ),
        ),
        (
            "beds",
            format!(
                r#"CREATE TABLE IF NOT EXISTS beds (
            id TEXT PRIMARY KEY,
            ward_id TEXT NOT NULL REFERENCES wards (id),
            bed_number TEXT NOT NULL,
            bed_type TEXT,
            status TEXT NOT NULL DEFAULT 'available' CHECK(status IN ({statuses})),
            notes TEXT,
            {AUDIT_COLUMNS},
            UNIQUE (ward_id, bed_number)
        )"#,
                statuses = sql_list(BedStatus::VARIANTS)
            ),
        ),
        (
            "admission_requests",
            format!(
                r#"CREATE TABLE IF NOT EXISTS admission_requests (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients (id),
            ward_id TEXT NOT NULL REFERENCES wards (id),
            doctor_id TEXT REFERENCES doctors (id),
            reason TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'routine' CHECK(priority IN ({priorities})),
            requested_date TEXT,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ({statuses})),
            notes TEXT,
            review_notes TEXT,
            reviewed_by TEXT,
            reviewed_at TEXT,
            {AUDIT_COLUMNS}
        )"#,
                priorities = sql_list(RequestPriority::VARIANTS),
                statuses = sql_list(RequestStatus::VARIANTS)
            ),
        ),
        (
            "ipd_admissions",
            format!(
                r#"CREATE TABLE IF NOT EXISTS ipd_admissions (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients (id),
            ward_id TEXT NOT NULL REFERENCES wards (id),
            bed_id TEXT NOT NULL REFERENCES beds (id),
            doctor_id TEXT REFERENCES doctors (id),
            request_id TEXT REFERENCES admission_requests (id),
            admission_date TEXT NOT NULL,
            discharge_date TEXT,
            diagnosis TEXT,
            status TEXT NOT NULL DEFAULT 'admitted' CHECK(status IN ({statuses})),
            notes TEXT,
            discharge_notes TEXT,
            {AUDIT_COLUMNS}
        )"#,
                statuses = sql_list(AdmissionStatus::VARIANTS)
            ),
        ),
        (
            "emergency_visits",
            format!(
                r#"CREATE TABLE IF NOT EXISTS emergency_visits (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients (id),
            triage_level INTEGER NOT NULL CHECK(triage_level BETWEEN 1 AND 5),
            chief_complaint TEXT NOT NULL,
            arrival_time TEXT NOT NULL,
            seen_at TEXT,
            departed_at TEXT,
            doctor_id TEXT REFERENCES doctors (id),
            vital_signs TEXT,
            status TEXT NOT NULL DEFAULT 'waiting' CHECK(status IN ({statuses})),
            disposition TEXT,
            notes TEXT,
            {AUDIT_COLUMNS}
        )"#,
                statuses = sql_list(VisitStatus::VARIANTS)
            ),
        ),
        (
            "lab_tests",
            format!(
                r#"CREATE TABLE IF NOT EXISTS lab_tests (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            category TEXT,
            specimen_type TEXT,
            price REAL NOT NULL DEFAULT 0 CHECK(price >= 0),
            turnaround_hours INTEGER,
            normal_range TEXT,
            unit TEXT,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            {AUDIT_COLUMNS}
        )"#
            ),
        ),
        (
            "lab_orders",
            format!(
                r#"CREATE TABLE IF NOT EXISTS lab_orders (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients (id),
            test_id TEXT NOT NULL REFERENCES lab_tests (id),
            doctor_id TEXT REFERENCES doctors (id),
            priority TEXT NOT NULL DEFAULT 'routine' CHECK(priority IN ({priorities})),
            status TEXT NOT NULL DEFAULT 'ordered' CHECK(status IN ({statuses})),
            ordered_at TEXT NOT NULL,
            sample_collected_at TEXT,
            completed_at TEXT,
            result TEXT,
            result_flag TEXT CHECK(result_flag IS NULL OR result_flag IN ('normal', 'abnormal', 'critical')),
            clinical_notes TEXT,
            {AUDIT_COLUMNS}
        )"#,
                priorities = sql_list(LabPriority::VARIANTS),
                statuses = sql_list(LabOrderStatus::VARIANTS)
            ),
        ),
        (
            "pharmacy_items",
            format!(
                r#"CREATE TABLE IF NOT EXISTS pharmacy_items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            generic_name TEXT,
            category TEXT,
            dosage_form TEXT CHECK(dosage_form IS NULL OR dosage_form IN ({forms})),
            strength TEXT,
            unit TEXT NOT NULL,
            reorder_level INTEGER NOT NULL DEFAULT 10 CHECK(reorder_level >= 0),
            manufacturer TEXT,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            {AUDIT_COLUMNS}
        )"#,
                forms = sql_list(DOSAGE_FORMS)
            ),
        ),
        (
            "stock_batches",
            format!(
                r#"CREATE TABLE IF NOT EXISTS stock_batches (
            id TEXT PRIMARY KEY,
            item_id TEXT NOT NULL REFERENCES pharmacy_items (id),
            batch_number TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK(quantity >= 0),
            cost_price REAL NOT NULL CHECK(cost_price >= 0),
            selling_price REAL NOT NULL CHECK(selling_price >= 0),
            expiry_date TEXT,
            received_date TEXT,
            supplier TEXT,
            {AUDIT_COLUMNS},
            UNIQUE (item_id, batch_number),
            CHECK(selling_price >= cost_price)
        )"#
            ),
        ),
        (
            "expense_categories",
            format!(
                r#"CREATE TABLE IF NOT EXISTS expense_categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 255),
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            {AUDIT_COLUMNS}
        )"#
            ),
        ),
        (
            "expenses",
            format!(
                r#"CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL REFERENCES expense_categories (id),
            amount REAL NOT NULL CHECK(amount > 0),
            expense_date TEXT NOT NULL,
            description TEXT,
            vendor TEXT,
            reference_number TEXT,
            payment_method TEXT CHECK(payment_method IS NULL OR payment_method IN ({methods})),
            {AUDIT_COLUMNS}
        )"#,
                methods = sql_list(PAYMENT_METHODS)
            ),
        ),
        (
            "bills",
            format!(
                r#"CREATE TABLE IF NOT EXISTS bills (
            id TEXT PRIMARY KEY,
            patient_id TEXT NOT NULL REFERENCES patients (id),
            admission_id TEXT REFERENCES ipd_admissions (id),
            insurance_id TEXT REFERENCES insurance_organizations (id),
            bill_number TEXT UNIQUE,
            total_amount REAL NOT NULL CHECK(total_amount >= 0),
            insurance_amount REAL NOT NULL DEFAULT 0 CHECK(insurance_amount >= 0),
            paid_amount REAL NOT NULL DEFAULT 0 CHECK(paid_amount >= 0 AND paid_amount <= total_amount + 0.005),
            status TEXT NOT NULL DEFAULT 'unpaid' CHECK(status IN ({statuses})),
            due_date TEXT,
            notes TEXT,
            {AUDIT_COLUMNS}
        )"#,
                statuses = sql_list(BillStatus::VARIANTS)
            ),
        ),
        (
            "payments",
            format!(
                r#"CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            bill_id TEXT NOT NULL REFERENCES bills (id),
            amount REAL NOT NULL CHECK(amount > 0),
            payment_method TEXT NOT NULL CHECK(payment_method IN ({methods})),
            reference_number TEXT,
            paid_at TEXT NOT NULL,
            notes TEXT,
            {AUDIT_COLUMNS}
        )"#,
                methods = sql_list(PAYMENT_METHODS)
            ),
        ),
        (
            "support_tickets",
            format!(
                r#"CREATE TABLE IF NOT EXISTS support_tickets (
            id TEXT PRIMARY KEY,
            subject TEXT NOT NULL CHECK(length(subject) > 0 AND length(subject) <= 255),
            description TEXT NOT NULL,
            category TEXT,
            priority TEXT NOT NULL DEFAULT 'medium' CHECK(priority IN ({priorities})),
            status TEXT NOT NULL DEFAULT 'open' CHECK(status IN ({statuses})),
            requester_name TEXT,
            requester_email TEXT,
            assigned_to TEXT,
            resolution TEXT,
            resolved_at TEXT,
            deleted_at TEXT,
            {AUDIT_COLUMNS}
        )"#,
                priorities = sql_list(TicketPriority::VARIANTS),
                statuses = sql_list(TicketStatus::VARIANTS)
            ),
        ),
        (
            "message_templates",
            format!(
                r#"CREATE TABLE IF NOT EXISTS message_templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 255),
            channel TEXT NOT NULL CHECK(channel IN ('sms', 'email')),
            subject TEXT,
            body TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1 CHECK(is_active IN (0, 1)),
            {AUDIT_COLUMNS}
        )"#
            ),
        ),
    ]
}

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_appointments_date ON appointments (appointment_date)",
    "CREATE INDEX IF NOT EXISTS idx_appointments_doctor ON appointments (doctor_id)",
    "CREATE INDEX IF NOT EXISTS idx_beds_ward ON beds (ward_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_admissions_dates ON ipd_admissions (admission_date, discharge_date)",
    "CREATE INDEX IF NOT EXISTS idx_admission_requests_status ON admission_requests (status)",
    "CREATE INDEX IF NOT EXISTS idx_emergency_arrival ON emergency_visits (arrival_time)",
    "CREATE INDEX IF NOT EXISTS idx_lab_orders_ordered ON lab_orders (ordered_at)",
    "CREATE INDEX IF NOT EXISTS idx_stock_batches_expiry ON stock_batches (expiry_date)",
    "CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses (expense_date)",
    "CREATE INDEX IF NOT EXISTS idx_bills_status ON bills (status)",
    "CREATE INDEX IF NOT EXISTS idx_payments_paid_at ON payments (paid_at)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_created ON support_tickets (created_at)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    for (table, ddl) in schema() {
        sqlx::query(&ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create table {}", table))?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to create index: {}", ddl))?;
    }

    log::info!("✅ Database schema ready");
    Ok(())
}

// ==================== UTILITY FUNCTIONS ====================

/// Names of the columns of `table`, in declaration order.
pub async fn get_table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;
    use crate::repositories::{Resource, SERVER_MANAGED};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn assert_columns<R: Resource>(pool: &SqlitePool) {
        let resource = R::default();
        let columns = get_table_columns(pool, resource.table_name()).await.unwrap();
        for column in resource.columns() {
            assert!(
                columns.iter().any(|c| c == column.name),
                "{}.{} missing from schema",
                resource.table_name(),
                column.name
            );
        }
        for managed in SERVER_MANAGED.iter().filter(|m| **m != "deleted_at") {
            assert!(columns.iter().any(|c| c == managed), "{}.{}", resource.table_name(), managed);
        }
    }

    #[actix_rt::test]
    async fn migrations_are_idempotent() {
        let pool = pool().await;
        run_migrations(&pool).await.unwrap();
    }

    #[actix_rt::test]
    async fn every_resource_column_exists() {
        let pool = pool().await;
        assert_columns::<Patients>(&pool).await;
        assert_columns::<Doctors>(&pool).await;
        assert_columns::<Appointments>(&pool).await;
        assert_columns::<Wards>(&pool).await;
        assert_columns::<Beds>(&pool).await;
        assert_columns::<Admissions>(&pool).await;
        assert_columns::<AdmissionRequests>(&pool).await;
        assert_columns::<EmergencyVisits>(&pool).await;
        assert_columns::<LabTests>(&pool).await;
        assert_columns::<LabOrders>(&pool).await;
        assert_columns::<PharmacyItems>(&pool).await;
        assert_columns::<StockBatches>(&pool).await;
        assert_columns::<ExpenseCategories>(&pool).await;
        assert_columns::<Expenses>(&pool).await;
        assert_columns::<InsuranceOrganizations>(&pool).await;
        assert_columns::<Bills>(&pool).await;
        assert_columns::<Payments>(&pool).await;
        assert_columns::<SupportTickets>(&pool).await;
        assert_columns::<MessageTemplates>(&pool).await;
    }
}
