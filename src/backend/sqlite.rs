//! SQLite 演示后端
//!
//! 启动时建表并写入演示数据（INSERT OR IGNORE，重复打开不会覆盖已有记录）。
//! 同时实现身份验证：TC 号查 user_id，挑战值必须与 TC 号一致。

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};

use crate::backend::{BackendError, DataOperations, OpResult};
use crate::core::{IdentityVerifier, VerificationResult};
use crate::tools::ToolOutcome;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    tc TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    email TEXT,
    package TEXT,
    package_id TEXT,
    line_status TEXT
);
CREATE TABLE IF NOT EXISTS packages (
    package_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    price REAL NOT NULL,
    details TEXT,
    data_cap_gb INTEGER
);
CREATE TABLE IF NOT EXISTS additional_packages (
    package_name TEXT PRIMARY KEY,
    package_type TEXT NOT NULL,
    price REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS package_requests (
    request_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    package_type TEXT NOT NULL,
    package_name TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS bills (
    bill_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    month TEXT NOT NULL,
    amount REAL NOT NULL,
    status TEXT NOT NULL,
    due_date TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS billing_disputes (
    dispute_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS feedbacks (
    feedback_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    feedback_text TEXT NOT NULL,
    rating INTEGER NOT NULL,
    submitted_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS support_tickets (
    ticket_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    service_type TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    cancelled_at TEXT
);
CREATE TABLE IF NOT EXISTS campaigns (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    valid_until TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS users_campaigns (
    user_id TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    PRIMARY KEY (user_id, campaign_id)
);
";

const SEED: &str = "
INSERT OR IGNORE INTO users VALUES
    ('U1', '12345678950', 'Ayşe Yılmaz', 'ayse@example.com', 'Süper Paket', 'P2', 'faturalı'),
    ('U2', '10000000146', 'Mehmet Demir', 'mehmet@example.com', 'Ekonomik Paket', 'P1', 'faturasız');
INSERT OR IGNORE INTO packages VALUES
    ('P1', 'Ekonomik Paket', 149.90, '10 GB internet + 500 dakika', 10),
    ('P2', 'Süper Paket', 249.90, '30 GB internet + 1000 dakika', 30),
    ('P3', 'Sınırsız Paket', 399.90, '100 GB internet + sınırsız dakika', 100);
INSERT OR IGNORE INTO additional_packages VALUES
    ('Haftalık 5 GB', 'internet', 49.90),
    ('Aylık 10 GB', 'internet', 79.90),
    ('1000 SMS', 'sms', 29.90),
    ('500 Dakika', 'dakika', 39.90),
    ('Her Şey Dahil Mini', 'her şey dahil', 99.90);
INSERT OR IGNORE INTO bills VALUES
    ('B1', 'U1', '2024-05', 150.50, 'unpaid', '2024-06-10'),
    ('B2', 'U1', '2024-04', 145.00, 'paid', '2024-05-10'),
    ('B3', 'U2', '2024-05', 99.90, 'unpaid', '2024-06-10');
INSERT OR IGNORE INTO campaigns VALUES
    ('C1', 'Yaz Kampanyası', 'Ek paketlerde %20 indirim', '2099-12-31'),
    ('C2', 'Bahar İndirimi', 'Fatura ödemelerinde puan', '2020-01-01');
";

const PAYMENT_METHODS: [&str; 3] = ["kredi kartı", "havale", "mobil ödeme"];
const PACKAGE_TYPES: [&str; 4] = ["internet", "sms", "dakika", "her şey dahil"];
const CLOSED_TICKET_STATUSES: [&str; 2] = ["Tamamlandı", "İptal edildi"];

const TURKISH_MONTHS: [(&str, u32); 18] = [
    ("ocak", 1),
    ("şubat", 2),
    ("subat", 2),
    ("mart", 3),
    ("nisan", 4),
    ("mayıs", 5),
    ("mayis", 5),
    ("haziran", 6),
    ("temmuz", 7),
    ("ağustos", 8),
    ("agustos", 8),
    ("eylül", 9),
    ("eylul", 9),
    ("ekim", 10),
    ("kasım", 11),
    ("kasim", 11),
    ("aralık", 12),
    ("aralik", 12),
];

static ISO_MONTH_RE: OnceLock<Regex> = OnceLock::new();
static YEAR_RE: OnceLock<Regex> = OnceLock::new();

/// `YYYY-MM` 或土耳其语月份名（可带年份，缺省为今年）规整为 `YYYY-MM`
pub fn normalize_month(input: &str) -> Option<String> {
    let text = input.trim().to_lowercase();
    let iso = ISO_MONTH_RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{1,2})$").unwrap());
    if let Some(caps) = iso.captures(&text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        return (1..=12)
            .contains(&month)
            .then(|| format!("{:04}-{:02}", year, month));
    }
    let month = TURKISH_MONTHS
        .iter()
        .find(|(name, _)| text.contains(name))
        .map(|(_, m)| *m)?;
    let year = YEAR_RE
        .get_or_init(|| Regex::new(r"\d{4}").unwrap())
        .find(&text)
        .and_then(|m| m.as_str().parse::<i32>().ok())
        .unwrap_or_else(|| Local::now().year());
    Some(format!("{:04}-{:02}", year, month))
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn user_not_found(user_id: &str) -> ToolOutcome {
    ToolOutcome::failed(format!("Kullanıcı '{}' bulunamadı.", user_id))
}

#[derive(Debug, Clone, Serialize)]
struct UserRow {
    user_id: String,
    tc: String,
    name: String,
    email: Option<String>,
    package: Option<String>,
    package_id: Option<String>,
    line_status: Option<String>,
}

fn find_user(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, BackendError> {
    let row = conn
        .query_row(
            "SELECT user_id, tc, name, email, package, package_id, line_status FROM users WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(UserRow {
                    user_id: row.get(0)?,
                    tc: row.get(1)?,
                    name: row.get(2)?,
                    email: row.get(3)?,
                    package: row.get(4)?,
                    package_id: row.get(5)?,
                    line_status: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn package_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "package_id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "price": row.get::<_, f64>(2)?,
        "details": row.get::<_, Option<String>>(3)?,
        "data_cap_gb": row.get::<_, Option<i64>>(4)?,
    }))
}

/// SQLite 后端
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, BackendError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, BackendError> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(SEED)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, BackendError>,
    ) -> Result<R, BackendError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BackendError::Lock(e.to_string()))?;
        f(&conn)
    }

    /// 用户存在时执行 f，否则返回「用户不存在」
    fn for_user(
        &self,
        user_id: &str,
        f: impl FnOnce(&Connection, UserRow) -> OpResult,
    ) -> OpResult {
        self.with_conn(|conn| match find_user(conn, user_id)? {
            Some(user) => f(conn, user),
            None => Ok(user_not_found(user_id)),
        })
    }

    pub fn user_id_for_national_id(&self, national_id: &str) -> Result<Option<String>, BackendError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT user_id FROM users WHERE tc = ?1",
                    params![national_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}

#[async_trait]
impl IdentityVerifier for SqliteBackend {
    async fn verify(&self, national_id: &str, challenge: &str) -> VerificationResult {
        match self.user_id_for_national_id(national_id) {
            Ok(Some(user_id)) if challenge == national_id => VerificationResult::verified(user_id),
            Ok(Some(_)) => VerificationResult::rejected("Kimlik doğrulama başarısız."),
            Ok(None) => VerificationResult::rejected("Kullanıcı bulunamadı."),
            Err(e) => {
                tracing::warn!("Identity lookup failed: {}", e);
                VerificationResult::rejected(e.to_string())
            }
        }
    }
}

impl DataOperations for SqliteBackend {
    fn get_package_information(&self, user_id: &str) -> OpResult {
        self.for_user(user_id, |conn, user| {
            let Some(package_id) = user.package_id else {
                return Ok(ToolOutcome::failed("Aktif paketiniz bulunmuyor."));
            };
            let package = conn
                .query_row(
                    "SELECT package_id, name, price, details, data_cap_gb FROM packages WHERE package_id = ?1",
                    params![package_id],
                    package_row,
                )
                .optional()?;
            Ok(match package {
                Some(mut p) => {
                    p["message"] = json!(format!("Mevcut paketiniz: '{}'", p["name"].as_str().unwrap_or_default()));
                    ToolOutcome::ok(p)
                }
                None => ToolOutcome::failed(format!("Paket detayları '{}' için bulunamadı.", package_id)),
            })
        })
    }

    fn cancel_current_package(&self, user_id: &str) -> OpResult {
        self.for_user(user_id, |conn, user| {
            if user.package.is_none() && user.package_id.is_none() {
                return Ok(ToolOutcome::failed("Zaten aktif paketiniz bulunmuyor."));
            }
            conn.execute(
                "UPDATE users SET package = NULL, package_id = NULL WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(ToolOutcome::ok(json!({
                "message": format!("{} numaralı kullanıcının mevcut paketi iptal edilmiştir.", user_id),
                "status": "Paket iptal edildi",
            })))
        })
    }

    fn get_bill_info(&self, user_id: &str, month: &str) -> OpResult {
        let Some(month) = normalize_month(month) else {
            return Ok(ToolOutcome::failed(
                "Geçersiz ay bilgisi. Lütfen YYYY-AA şeklinde giriniz.",
            ));
        };
        self.for_user(user_id, |conn, _| {
            let bill = conn
                .query_row(
                    "SELECT amount, status, due_date FROM bills WHERE user_id = ?1 AND month = ?2",
                    params![user_id, month],
                    |row| Ok((row.get::<_, f64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
                )
                .optional()?;
            Ok(match bill {
                Some((amount, status, due_date)) => ToolOutcome::ok(json!({
                    "message": format!("{} ayına ait fatura tutarınız: {:.2} TL", month, amount),
                    "month": month,
                    "amount": amount,
                    "status": status,
                    "due_date": due_date,
                })),
                None => ToolOutcome::failed(format!("{} ayı için fatura bilgisi bulunamadı.", month)),
            })
        })
    }

    fn get_user_info(&self, user_id: &str) -> OpResult {
        self.for_user(user_id, |_, user| {
            Ok(ToolOutcome::ok(serde_json::to_value(&user).unwrap_or(Value::Null)))
        })
    }

    fn initiate_package_change(&self, user_id: &str, package_id: &str) -> OpResult {
        self.for_user(user_id, |conn, _| {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM packages WHERE package_id = ?1",
                    params![package_id.trim()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(name) = name else {
                return Ok(ToolOutcome::failed("Geçersiz paket ID'si seçildi."));
            };
            conn.execute(
                "UPDATE users SET package = ?1, package_id = ?2 WHERE user_id = ?3",
                params![name, package_id.trim(), user_id],
            )?;
            Ok(ToolOutcome::message(format!(
                "{} paketine geçiş işleminiz alınmıştır. 24 saat içinde aktifleşecektir.",
                name
            )))
        })
    }

    fn get_available_packages(&self) -> OpResult {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT package_id, name, price, details, data_cap_gb FROM packages ORDER BY package_id",
            )?;
            let packages = stmt
                .query_map([], package_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if packages.is_empty() {
                ToolOutcome::failed("Uygun paket bulunamadı.")
            } else {
                ToolOutcome::ok(Value::Array(packages))
            })
        })
    }

    fn get_additional_packages(&self, package_type: Option<&str>) -> OpResult {
        let filter = package_type.map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty());
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT package_name, package_type, price FROM additional_packages
                 WHERE ?1 IS NULL OR package_type = ?1 ORDER BY package_type, package_name",
            )?;
            let packages = stmt
                .query_map(params![filter], |row| {
                    Ok(json!({
                        "package_name": row.get::<_, String>(0)?,
                        "package_type": row.get::<_, String>(1)?,
                        "price": row.get::<_, f64>(2)?,
                    }))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if packages.is_empty() {
                ToolOutcome::failed("Ek paket bulunamadı.")
            } else {
                ToolOutcome::ok(Value::Array(packages))
            })
        })
    }

    fn submit_feedback(&self, user_id: &str, feedback_text: &str, rating: i64) -> OpResult {
        let text = feedback_text.trim();
        if text.chars().count() < 10 {
            return Ok(ToolOutcome::failed("Geri bildirim en az 10 karakter olmalıdır."));
        }
        if !(1..=5).contains(&rating) {
            return Ok(ToolOutcome::failed("Puan 1 ile 5 arasında olmalıdır."));
        }
        self.for_user(user_id, |conn, _| {
            let feedback_id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO feedbacks (feedback_id, user_id, feedback_text, rating, submitted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![feedback_id, user_id, text, rating, now_stamp()],
            )?;
            Ok(ToolOutcome::ok(json!({
                "message": "Geri bildiriminiz başarıyla kaydedildi.",
                "feedback_id": feedback_id,
            })))
        })
    }

    fn request_additional_package(
        &self,
        user_id: &str,
        package_type: &str,
        package_name: &str,
        quantity: i64,
    ) -> OpResult {
        let package_type = package_type.trim().to_lowercase();
        if !PACKAGE_TYPES.contains(&package_type.as_str()) {
            return Ok(ToolOutcome::failed(format!(
                "Geçersiz paket türü. Geçerli türler: {}",
                PACKAGE_TYPES.join(", ")
            )));
        }
        if quantity <= 0 {
            return Ok(ToolOutcome::failed("Geçersiz miktar. Lütfen pozitif bir sayı giriniz."));
        }
        self.for_user(user_id, |conn, user| {
            let mut stmt = conn.prepare(
                "SELECT package_name FROM additional_packages WHERE package_type = ?1 ORDER BY package_name",
            )?;
            let options = stmt
                .query_map(params![package_type], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            if options.is_empty() {
                return Ok(ToolOutcome::failed(format!(
                    "'{}' türünde ek paket bulunamadı.",
                    package_type
                )));
            }
            let wanted = package_name.trim().to_lowercase();
            let Some(name) = options.iter().find(|o| o.to_lowercase() == wanted).cloned() else {
                return Ok(ToolOutcome::failed(format!(
                    "'{}' bulunamadı. {} türünde seçenekler: {}.",
                    package_name.trim(),
                    package_type,
                    options.join(", ")
                )));
            };
            let duplicates: i64 = conn.query_row(
                "SELECT COUNT(*) FROM package_requests
                 WHERE user_id = ?1 AND package_type = ?2 AND package_name = ?3 AND quantity = ?4",
                params![user_id, package_type, name, quantity],
                |row| row.get(0),
            )?;
            if duplicates > 0 {
                return Ok(ToolOutcome::failed("Aynı paket talebi zaten yapılmış."));
            }
            let request_id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO package_requests
                 (request_id, user_id, package_type, package_name, quantity, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'beklemede', ?6)",
                params![request_id, user_id, package_type, name, quantity, now_stamp()],
            )?;
            Ok(ToolOutcome::ok(json!({
                "message": format!("{} paketinden {} adet talebiniz başarıyla alındı.", name, quantity),
                "request_id": request_id,
                "user_name": user.name,
                "package_type": package_type,
                "package_name": name,
                "quantity": quantity,
            })))
        })
    }

    fn initiate_billing_dispute(&self, user_id: &str, reason: &str) -> OpResult {
        let reason = reason.trim();
        if reason.chars().count() < 6 {
            return Ok(ToolOutcome::failed(
                "Lütfen itiraz sebebini en az 6 karakter olarak belirtin.",
            ));
        }
        self.for_user(user_id, |conn, _| {
            let dispute_id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO billing_disputes (dispute_id, user_id, reason, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![dispute_id, user_id, reason, now_stamp()],
            )?;
            Ok(ToolOutcome::ok(json!({
                "message": "Fatura itiraz talebiniz başarıyla alındı.",
                "dispute_id": dispute_id,
            })))
        })
    }

    fn get_package_id_by_name(&self, package_name: &str) -> OpResult {
        let wanted = package_name.trim().to_lowercase();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT package_id, name FROM packages")?;
            let packages = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(
                match packages.into_iter().find(|(_, name)| name.to_lowercase() == wanted) {
                    Some((id, name)) => ToolOutcome::ok(json!({
                        "message": format!("{} paketi bulundu. Paket ID: {}", name, id),
                        "package_id": id,
                    })),
                    None => ToolOutcome::failed(format!(
                        "'{}' adına sahip bir paket bulunamadı.",
                        package_name.trim()
                    )),
                },
            )
        })
    }

    fn get_line_status(&self, user_id: &str) -> OpResult {
        self.for_user(user_id, |_, user| {
            Ok(match user.line_status.as_deref() {
                None | Some("") => {
                    ToolOutcome::failed("Kullanıcıya ait hat durumu bilgisi bulunamadı.")
                }
                Some(s @ ("faturalı" | "faturasız" | "askıda" | "iptal")) => {
                    ToolOutcome::message(format!("Hattınızın mevcut durumu: {}.", s))
                }
                Some(other) => ToolOutcome::failed(format!("Bilinmeyen hat durumu: '{}'.", other)),
            })
        })
    }

    fn pay_bill(&self, user_id: &str, amount: f64, method: &str) -> OpResult {
        let method = method.trim().to_lowercase();
        if !PAYMENT_METHODS.contains(&method.as_str()) {
            return Ok(ToolOutcome::failed(format!(
                "Geçersiz ödeme yöntemi. Geçerli yöntemler: {}",
                PAYMENT_METHODS.join(", ")
            )));
        }
        if amount <= 0.0 {
            return Ok(ToolOutcome::failed("Geçersiz ödeme miktarı."));
        }
        self.for_user(user_id, |conn, user| {
            let bill = conn
                .query_row(
                    "SELECT bill_id, due_date FROM bills
                     WHERE user_id = ?1 AND status = 'unpaid' AND ABS(amount - ?2) < 0.01 LIMIT 1",
                    params![user_id, amount],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            let Some((bill_id, due_date)) = bill else {
                return Ok(ToolOutcome::failed(format!(
                    "{:.2} TL tutarında ödenecek fatura bulunamadı.",
                    amount
                )));
            };
            conn.execute("UPDATE bills SET status = 'paid' WHERE bill_id = ?1", params![bill_id])?;
            Ok(ToolOutcome::ok(json!({
                "message": format!(
                    "{} adlı kullanıcı, {} tarihli {:.2} TL tutarındaki faturasını '{}' ile başarıyla ödedi.",
                    user.name, due_date, amount, method
                ),
                "bill_id": bill_id,
            })))
        })
    }

    fn get_outstanding_balance(&self, user_id: &str) -> OpResult {
        self.for_user(user_id, |conn, _| {
            let (count, unpaid): (i64, f64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'unpaid' THEN amount ELSE 0 END), 0)
                 FROM bills WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(if count == 0 {
                ToolOutcome::failed("Fatura bulunamadı.")
            } else if unpaid <= 0.0 {
                ToolOutcome::failed("Tüm faturalar ödenmiş durumda.")
            } else {
                ToolOutcome::ok(json!({
                    "message": format!("Toplam ödenmemiş fatura borcunuz: {:.2} TL", unpaid),
                    "amount": unpaid,
                }))
            })
        })
    }

    fn cancel_support_ticket(&self, user_id: &str, ticket_id: &str) -> OpResult {
        let ticket_id = ticket_id.trim();
        self.for_user(user_id, |conn, _| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM support_tickets WHERE user_id = ?1 AND ticket_id = ?2",
                    params![user_id, ticket_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(status) = status else {
                return Ok(ToolOutcome::failed("İptal edilecek destek talebi bulunamadı."));
            };
            if CLOSED_TICKET_STATUSES.contains(&status.as_str()) {
                return Ok(ToolOutcome::failed(format!(
                    "{} numaralı destek talebi zaten {}.",
                    ticket_id,
                    status.to_lowercase()
                )));
            }
            conn.execute(
                "UPDATE support_tickets SET status = 'İptal edildi', cancelled_at = ?1
                 WHERE user_id = ?2 AND ticket_id = ?3",
                params![now_stamp(), user_id, ticket_id],
            )?;
            Ok(ToolOutcome::ok(json!({
                "message": format!("{} numaralı destek talebiniz iptal edilmiştir.", ticket_id),
                "status": "İptal edildi",
            })))
        })
    }

    fn get_ticket_status(&self, user_id: &str, ticket_id: &str) -> OpResult {
        let ticket_id = ticket_id.trim();
        self.for_user(user_id, |conn, _| {
            let ticket = conn
                .query_row(
                    "SELECT service_type, description, status, created_at FROM support_tickets
                     WHERE user_id = ?1 AND ticket_id = ?2",
                    params![user_id, ticket_id],
                    |row| {
                        Ok(json!({
                            "ticket_id": ticket_id,
                            "service_type": row.get::<_, String>(0)?,
                            "description": row.get::<_, String>(1)?,
                            "status": row.get::<_, String>(2)?,
                            "created_at": row.get::<_, String>(3)?,
                        }))
                    },
                )
                .optional()?;
            Ok(match ticket {
                Some(mut t) => {
                    t["message"] = json!(format!(
                        "{} numaralı destek talebinizin durumu: {}",
                        ticket_id,
                        t["status"].as_str().unwrap_or_default()
                    ));
                    ToolOutcome::ok(t)
                }
                None => ToolOutcome::failed("Destek talebi bulunamadı."),
            })
        })
    }

    fn create_support_ticket(&self, user_id: &str, service_type: &str, description: &str) -> OpResult {
        let service_type = service_type.trim();
        let description = description.trim();
        if service_type.is_empty() {
            return Ok(ToolOutcome::failed("Hizmet türü boş olamaz."));
        }
        let len = description.chars().count();
        if !(5..=1000).contains(&len) {
            return Ok(ToolOutcome::failed(
                "Açıklama 5 ile 1000 karakter arasında olmalıdır.",
            ));
        }
        self.for_user(user_id, |conn, _| {
            let active: i64 = conn.query_row(
                "SELECT COUNT(*) FROM support_tickets
                 WHERE user_id = ?1 AND LOWER(service_type) = LOWER(?2) AND status NOT IN (?3, ?4)",
                params![
                    user_id,
                    service_type,
                    CLOSED_TICKET_STATUSES[0],
                    CLOSED_TICKET_STATUSES[1]
                ],
                |row| row.get(0),
            )?;
            if active > 0 {
                return Ok(ToolOutcome::failed(format!(
                    "{} servisi için zaten aktif bir talebiniz bulunmaktadır.",
                    service_type
                )));
            }
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let ticket_id = format!("TCK{}{}", Local::now().timestamp(), &suffix[..6]);
            conn.execute(
                "INSERT INTO support_tickets
                 (ticket_id, user_id, service_type, description, status, created_at, cancelled_at)
                 VALUES (?1, ?2, ?3, ?4, 'Talep alındı', ?5, NULL)",
                params![ticket_id, user_id, service_type, description, now_stamp()],
            )?;
            Ok(ToolOutcome::ok(json!({
                "message": format!("{} ile ilgili destek talebiniz oluşturuldu. Talep numarası: {}", service_type, ticket_id),
                "ticket_id": ticket_id,
            })))
        })
    }

    fn join_campaign(&self, user_id: &str, campaign_id: &str) -> OpResult {
        let campaign_id = campaign_id.trim();
        self.for_user(user_id, |conn, _| {
            let valid_until: Option<String> = conn
                .query_row(
                    "SELECT valid_until FROM campaigns WHERE id = ?1",
                    params![campaign_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(valid_until) = valid_until else {
                return Ok(ToolOutcome::failed(format!(
                    "{} id'sine sahip kampanya bulunamadı.",
                    campaign_id
                )));
            };
            let expired = NaiveDate::parse_from_str(&valid_until, "%Y-%m-%d")
                .map(|d| d < Local::now().date_naive())
                .unwrap_or(true);
            if expired {
                return Ok(ToolOutcome::failed("Kampanyanın süresi dolmuş."));
            }
            let joined = conn
                .query_row(
                    "SELECT 1 FROM users_campaigns WHERE user_id = ?1 AND campaign_id = ?2",
                    params![user_id, campaign_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if joined {
                return Ok(ToolOutcome::failed("Bu kampanyaya zaten katıldınız."));
            }
            conn.execute(
                "INSERT INTO users_campaigns (user_id, campaign_id) VALUES (?1, ?2)",
                params![user_id, campaign_id],
            )?;
            Ok(ToolOutcome::message("Kampanyaya başarıyla katıldınız."))
        })
    }

    fn get_campaigns(&self, user_id: &str) -> OpResult {
        let today = Local::now().date_naive();
        self.for_user(user_id, |conn, _| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.title, c.description, c.valid_until FROM campaigns c
                 WHERE NOT EXISTS (
                     SELECT 1 FROM users_campaigns uc WHERE uc.user_id = ?1 AND uc.campaign_id = c.id
                 )
                 ORDER BY c.id",
            )?;
            let campaigns = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            let active: Vec<Value> = campaigns
                .into_iter()
                .filter(|(_, _, _, until)| {
                    NaiveDate::parse_from_str(until, "%Y-%m-%d")
                        .map(|d| d >= today)
                        .unwrap_or(false)
                })
                .map(|(id, title, description, until)| {
                    json!({ "id": id, "title": title, "description": description, "valid_until": until })
                })
                .collect();
            Ok(if active.is_empty() {
                ToolOutcome::failed("Mevcut kampanya bulunmamaktadır.")
            } else {
                ToolOutcome::ok(Value::Array(active))
            })
        })
    }
}
