use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::TransactionBehavior;

use crate::core::error::{AppError, AppResult};

/// Статус платежа. Переходы монотонны: pending → paid, pending → cancelled;
/// paid и cancelled — терминальные состояния.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(AppError::Persistence(format!("unknown payment status '{other}'"))),
        }
    }
}

/// Платеж в локальной базе. payment_id — глобально уникальная метка,
/// производная от email клиента и момента создания ("vpn_<email>_<unix>").
#[derive(Debug, Clone)]
pub struct Payment {
    pub payment_id: String,
    pub email: String,
    /// Сумма в рублях
    pub amount: f64,
    /// Количество дней продления
    pub days: i64,
    /// Inbound панели, в котором живет клиент
    pub inbound_id: i64,
    pub status: PaymentStatus,
    pub created_at: String,
    pub paid_at: Option<String>,
}

/// Привязка email клиента к Telegram chat id (может отсутствовать).
#[derive(Debug, Clone)]
pub struct ClientBinding {
    pub email: String,
    pub tgid: Option<String>,
}

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and ensures the
/// schema exists on the first connection.
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder().max_size(10).build(manager)?;

    let conn = pool.get()?;
    migrate_schema(&conn)?;

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is automatically returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Ensure all required tables exist. Safe to run on every startup.
///
/// The settings tables (panel credentials, bot settings, gateway wallet,
/// trial policy, bot texts) are owned by the admin UI; this engine only
/// reads them, but creates them so a fresh database is immediately usable.
fn migrate_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS payments (
            payment_id TEXT PRIMARY KEY,
            email      TEXT NOT NULL,
            amount     REAL NOT NULL,
            days       INTEGER NOT NULL,
            inbound_id INTEGER NOT NULL,
            status     TEXT NOT NULL DEFAULT 'pending',
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            paid_at    DATETIME
        );
        CREATE TABLE IF NOT EXISTS client_data (
            email      TEXT PRIMARY KEY,
            tgid       TEXT,
            updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE IF NOT EXISTS notification_history (
            email       TEXT NOT NULL,
            expiry_time INTEGER NOT NULL,
            created_at  DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(email, expiry_time)
        );
        CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status);
        CREATE TABLE IF NOT EXISTS settings (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            panel_url TEXT NOT NULL,
            username  TEXT NOT NULL,
            password  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS telegram_settings (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            bot_token             TEXT,
            is_enabled            INTEGER NOT NULL DEFAULT 0,
            notify_days           INTEGER NOT NULL DEFAULT 3,
            check_interval        INTEGER NOT NULL DEFAULT 60,
            interval_unit         TEXT NOT NULL DEFAULT 'minutes',
            payment_amount        REAL,
            create_payment        INTEGER NOT NULL DEFAULT 0,
            notification_template TEXT
        );
        CREATE TABLE IF NOT EXISTS yoomoney_settings (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            wallet_id    TEXT NOT NULL,
            secret_key   TEXT NOT NULL,
            redirect_url TEXT,
            is_enabled   INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS test_account_settings (
            id         INTEGER PRIMARY KEY CHECK (id = 1),
            is_enabled INTEGER NOT NULL DEFAULT 0,
            days       INTEGER NOT NULL DEFAULT 3,
            traffic_gb INTEGER NOT NULL DEFAULT 10
        );
        CREATE TABLE IF NOT EXISTS bot_messages (
            message_type TEXT PRIMARY KEY,
            message_text TEXT,
            image_path   TEXT,
            show_image   INTEGER NOT NULL DEFAULT 0,
            is_enabled   INTEGER NOT NULL DEFAULT 1
        );",
    )
}

fn payment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Payment, String)> {
    let status_raw: String = row.get(5)?;
    Ok((
        Payment {
            payment_id: row.get(0)?,
            email: row.get(1)?,
            amount: row.get(2)?,
            days: row.get(3)?,
            inbound_id: row.get(4)?,
            status: PaymentStatus::Pending, // replaced by the caller
            created_at: row.get(6)?,
            paid_at: row.get(7)?,
        },
        status_raw,
    ))
}

const PAYMENT_COLUMNS: &str =
    "payment_id, email, amount, days, inbound_id, status, created_at, paid_at";

/// Создает платеж со статусом pending.
pub fn insert_payment(
    conn: &DbConnection,
    payment_id: &str,
    email: &str,
    amount: f64,
    days: i64,
    inbound_id: i64,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO payments (payment_id, email, amount, days, inbound_id, status)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
        rusqlite::params![payment_id, email, amount, days, inbound_id],
    )?;
    Ok(())
}

/// Получает платеж по идентификатору.
pub fn get_payment(conn: &DbConnection, payment_id: &str) -> AppResult<Option<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE payment_id = ?1"
    ))?;
    let mut rows = stmt.query([payment_id])?;

    if let Some(row) = rows.next()? {
        let (mut payment, status_raw) = payment_from_row(row)?;
        payment.status = PaymentStatus::parse(&status_raw)?;
        Ok(Some(payment))
    } else {
        Ok(None)
    }
}

/// Возвращает идентификаторы всех платежей со статусом pending.
/// Порядок — порядок выборки из базы; внешнего смысла он не несет.
pub fn list_pending_payment_ids(conn: &DbConnection) -> AppResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT payment_id FROM payments WHERE status = 'pending'")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

/// Возвращает все платежи (для админского списка; без транзакционной
/// изоляции от конкурентных записей).
pub fn list_payments(conn: &DbConnection) -> AppResult<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY created_at DESC"
    ))?;
    let mut rows = stmt.query([])?;

    let mut payments = Vec::new();
    while let Some(row) = rows.next()? {
        let (mut payment, status_raw) = payment_from_row(row)?;
        payment.status = PaymentStatus::parse(&status_raw)?;
        payments.push(payment);
    }
    Ok(payments)
}

/// Захватывает платеж: pending → paid c фиксацией paid_at.
///
/// BEGIN IMMEDIATE сериализует конкурирующие вызовы (ручная проверка из
/// админки и тик планировщика); возвращает false, если платеж уже не
/// pending — значит, его обработал кто-то другой, и это не ошибка.
pub fn claim_payment_paid(conn: &mut DbConnection, payment_id: &str) -> AppResult<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM payments WHERE payment_id = ?1",
            [payment_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match status.as_deref() {
        Some("pending") => {
            tx.execute(
                "UPDATE payments SET status = 'paid', paid_at = datetime('now') WHERE payment_id = ?1",
                [payment_id],
            )?;
            tx.commit()?;
            Ok(true)
        }
        Some(_) => Ok(false),
        None => Err(AppError::NotFound(format!("payment {payment_id}"))),
    }
}

/// Откатывает захват после неудачного продления: paid → pending,
/// paid_at сбрасывается. Следующий тик попробует снова.
pub fn revert_payment_claim(conn: &DbConnection, payment_id: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE payments SET status = 'pending', paid_at = NULL WHERE payment_id = ?1 AND status = 'paid'",
        [payment_id],
    )?;
    Ok(())
}

/// Отменяет платеж. Допустимо только из pending.
pub fn cancel_payment(conn: &DbConnection, payment_id: &str) -> AppResult<()> {
    let payment =
        get_payment(conn, payment_id)?.ok_or_else(|| AppError::NotFound(format!("payment {payment_id}")))?;

    if payment.status != PaymentStatus::Pending {
        return Err(AppError::InvalidStateTransition(format!(
            "cannot cancel payment {payment_id} with status {}",
            payment.status.as_str()
        )));
    }

    conn.execute(
        "UPDATE payments SET status = 'cancelled' WHERE payment_id = ?1",
        [payment_id],
    )?;
    Ok(())
}

/// Удаляет платеж. Допустимо только для отмененных платежей; pending и
/// paid остаются в базе для истории.
pub fn delete_payment(conn: &DbConnection, payment_id: &str) -> AppResult<()> {
    let payment =
        get_payment(conn, payment_id)?.ok_or_else(|| AppError::NotFound(format!("payment {payment_id}")))?;

    if payment.status != PaymentStatus::Cancelled {
        return Err(AppError::InvalidStateTransition(format!(
            "cannot delete payment {payment_id} with status {}",
            payment.status.as_str()
        )));
    }

    conn.execute("DELETE FROM payments WHERE payment_id = ?1", [payment_id])?;
    Ok(())
}

/// Получает привязку клиента по email.
pub fn get_binding(conn: &DbConnection, email: &str) -> AppResult<Option<ClientBinding>> {
    let mut stmt = conn.prepare("SELECT email, tgid FROM client_data WHERE email = ?1")?;
    let mut rows = stmt.query([email])?;

    if let Some(row) = rows.next()? {
        Ok(Some(ClientBinding {
            email: row.get(0)?,
            tgid: row.get(1)?,
        }))
    } else {
        Ok(None)
    }
}

/// Находит email клиента по Telegram chat id (без учета регистра).
pub fn get_email_by_tgid(conn: &DbConnection, tgid: &str) -> AppResult<Option<String>> {
    let mut stmt = conn.prepare("SELECT email FROM client_data WHERE tgid = ?1 COLLATE NOCASE")?;
    let mut rows = stmt.query([tgid])?;

    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}

/// Создает или обновляет привязку email ↔ chat id (одна строка на email).
pub fn upsert_binding(conn: &DbConnection, email: &str, tgid: Option<&str>) -> AppResult<()> {
    conn.execute(
        "INSERT INTO client_data (email, tgid) VALUES (?1, ?2)
         ON CONFLICT(email) DO UPDATE SET tgid = excluded.tgid, updated_at = CURRENT_TIMESTAMP",
        rusqlite::params![email, tgid],
    )?;
    Ok(())
}

/// Удаляет записи об отправленных уведомлениях старше 24 часов.
/// Возвращает количество удаленных строк.
pub fn purge_old_notifications(conn: &DbConnection) -> AppResult<usize> {
    let purged = conn.execute(
        "DELETE FROM notification_history WHERE created_at < datetime('now', '-1 day')",
        [],
    )?;
    Ok(purged)
}

/// Проверяет, отправлялось ли уведомление для точной пары (email, expiry).
pub fn notification_sent(conn: &DbConnection, email: &str, expiry_time: i64) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notification_history WHERE email = ?1 AND expiry_time = ?2",
        rusqlite::params![email, expiry_time],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Фиксирует отправленное уведомление. Вызывается только после успешной
/// отправки, чтобы сбой доставки не гасил повторную попытку.
pub fn record_notification(conn: &DbConnection, email: &str, expiry_time: i64) -> AppResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO notification_history (email, expiry_time) VALUES (?1, ?2)",
        rusqlite::params![email, expiry_time],
    )?;
    Ok(())
}
