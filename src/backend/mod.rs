//! 业务数据操作
//!
//! 工具目录中的每个工具都落到 DataOperations 的一个方法上。业务校验失败返回 `Ok(ToolOutcome::Failed)`，
//! 只有存储层故障才返回 BackendError。方法是同步的，由工具层放到 blocking 线程执行。

pub mod sqlite;

use thiserror::Error;

use crate::tools::ToolOutcome;

pub use sqlite::SqliteBackend;

/// 存储层错误
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("backend lock poisoned: {0}")]
    Lock(String),
}

pub type OpResult = Result<ToolOutcome, BackendError>;

/// 电信客服后端能力
pub trait DataOperations: Send + Sync {
    fn get_package_information(&self, user_id: &str) -> OpResult;
    fn cancel_current_package(&self, user_id: &str) -> OpResult;
    fn get_bill_info(&self, user_id: &str, month: &str) -> OpResult;
    fn get_user_info(&self, user_id: &str) -> OpResult;
    fn initiate_package_change(&self, user_id: &str, package_id: &str) -> OpResult;
    fn get_available_packages(&self) -> OpResult;
    fn get_additional_packages(&self, package_type: Option<&str>) -> OpResult;
    fn submit_feedback(&self, user_id: &str, feedback_text: &str, rating: i64) -> OpResult;
    fn request_additional_package(
        &self,
        user_id: &str,
        package_type: &str,
        package_name: &str,
        quantity: i64,
    ) -> OpResult;
    fn initiate_billing_dispute(&self, user_id: &str, reason: &str) -> OpResult;
    fn get_package_id_by_name(&self, package_name: &str) -> OpResult;
    fn get_line_status(&self, user_id: &str) -> OpResult;
    fn pay_bill(&self, user_id: &str, amount: f64, method: &str) -> OpResult;
    fn get_outstanding_balance(&self, user_id: &str) -> OpResult;
    fn cancel_support_ticket(&self, user_id: &str, ticket_id: &str) -> OpResult;
    fn get_ticket_status(&self, user_id: &str, ticket_id: &str) -> OpResult;
    fn create_support_ticket(&self, user_id: &str, service_type: &str, description: &str) -> OpResult;
    fn join_campaign(&self, user_id: &str, campaign_id: &str) -> OpResult;
    fn get_campaigns(&self, user_id: &str) -> OpResult;
}
