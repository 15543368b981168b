//! 电信客服工具集
//!
//! 每个工具是一个 OperationTool：入参结构体（serde + schemars）决定参数列表，
//! 调用时反序列化参数，放到 blocking 线程执行 DataOperations 的对应方法。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::backend::{DataOperations, OpResult};
use crate::tools::schema::param_specs;
use crate::tools::{ParamSpec, Tool, ToolCatalog, ToolOutcome};

type Operation<A> = fn(&dyn DataOperations, A) -> OpResult;

/// 把一个数据操作包装成工具
pub struct OperationTool<A> {
    name: &'static str,
    description: &'static str,
    params: Vec<ParamSpec>,
    ops: Arc<dyn DataOperations>,
    op: Operation<A>,
    _args: PhantomData<fn() -> A>,
}

impl<A: DeserializeOwned + JsonSchema> OperationTool<A> {
    pub fn new(
        name: &'static str,
        description: &'static str,
        ops: Arc<dyn DataOperations>,
        op: Operation<A>,
    ) -> Self {
        Self {
            name,
            description,
            params: param_specs::<A>(),
            ops,
            op,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<A> Tool for OperationTool<A>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters(&self) -> &[ParamSpec] {
        &self.params
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutcome, String> {
        let parsed: A = serde_json::from_value(Value::Object(args))
            .map_err(|e| format!("invalid arguments: {}", e))?;
        let ops = Arc::clone(&self.ops);
        let op = self.op;
        tokio::task::spawn_blocking(move || op(ops.as_ref(), parsed))
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
    }
}

#[derive(Deserialize, JsonSchema)]
pub struct UserArgs {
    pub user_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct NoArgs {}

#[derive(Deserialize, JsonSchema)]
pub struct BillArgs {
    pub user_id: String,
    /// YYYY-MM veya ay adı
    pub month: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct PackageChangeArgs {
    pub user_id: String,
    pub package_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct AdditionalPackagesArgs {
    pub package_type: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
pub struct FeedbackArgs {
    pub user_id: String,
    pub feedback_text: String,
    /// 1-5
    pub rating: i64,
}

#[derive(Deserialize, JsonSchema)]
pub struct AdditionalPackageRequestArgs {
    pub user_id: String,
    pub package_type: String,
    pub package_name: String,
    pub quantity: i64,
}

#[derive(Deserialize, JsonSchema)]
pub struct DisputeArgs {
    pub user_id: String,
    pub reason: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct PackageNameArgs {
    pub package_name: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct PaymentArgs {
    pub user_id: String,
    pub amount: f64,
    /// kredi kartı | havale | mobil ödeme
    pub method: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct TicketArgs {
    pub user_id: String,
    pub ticket_id: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct NewTicketArgs {
    pub user_id: String,
    pub service_type: String,
    pub description: String,
}

#[derive(Deserialize, JsonSchema)]
pub struct CampaignArgs {
    pub user_id: String,
    pub campaign_id: String,
}

/// 注册全部电信工具
pub fn telecom_catalog(ops: Arc<dyn DataOperations>) -> ToolCatalog {
    let mut c = ToolCatalog::new();
    c.register(OperationTool::new(
        "get_package_information",
        "Kullanıcının mevcut paket bilgisini getirir. Current package of the user.",
        ops.clone(),
        |o, a: UserArgs| o.get_package_information(&a.user_id),
    ));
    c.register(OperationTool::new(
        "cancel_current_package",
        "Kullanıcının mevcut paketini iptal eder. Cancels the current package.",
        ops.clone(),
        |o, a: UserArgs| o.cancel_current_package(&a.user_id),
    ));
    c.register(OperationTool::new(
        "get_bill_info",
        "Belirtilen ayın fatura tutarını getirir. Bill amount for a month (YYYY-MM or Turkish month name).",
        ops.clone(),
        |o, a: BillArgs| o.get_bill_info(&a.user_id, &a.month),
    ));
    c.register(OperationTool::new(
        "get_user_info",
        "Kullanıcı bilgilerini getirir. Profile of the user.",
        ops.clone(),
        |o, a: UserArgs| o.get_user_info(&a.user_id),
    ));
    c.register(OperationTool::new(
        "initiate_package_change",
        "Paket ID'si verilen pakete geçiş başlatır. Switches to the package with the given id (P1, P2, ...).",
        ops.clone(),
        |o, a: PackageChangeArgs| o.initiate_package_change(&a.user_id, &a.package_id),
    ));
    c.register(OperationTool::new(
        "get_available_packages",
        "Geçiş yapılabilecek tüm paketleri listeler. Lists all main packages.",
        ops.clone(),
        |o, _: NoArgs| o.get_available_packages(),
    ));
    c.register(OperationTool::new(
        "get_additional_packages",
        "Ek paketleri listeler, isteğe bağlı tür filtresi (internet, sms, dakika, her şey dahil).",
        ops.clone(),
        |o, a: AdditionalPackagesArgs| o.get_additional_packages(a.package_type.as_deref()),
    ));
    c.register(OperationTool::new(
        "submit_feedback",
        "Geri bildirim ve 1-5 arası puan kaydeder. Stores feedback with a rating.",
        ops.clone(),
        |o, a: FeedbackArgs| o.submit_feedback(&a.user_id, &a.feedback_text, a.rating),
    ));
    c.register(OperationTool::new(
        "request_additional_package",
        "Ek paket talebi oluşturur (tür, paket adı, adet). Requests an additional package.",
        ops.clone(),
        |o, a: AdditionalPackageRequestArgs| {
            o.request_additional_package(&a.user_id, &a.package_type, &a.package_name, a.quantity)
        },
    ));
    c.register(OperationTool::new(
        "initiate_billing_dispute",
        "Faturaya itiraz kaydı açar. Opens a billing dispute with a reason.",
        ops.clone(),
        |o, a: DisputeArgs| o.initiate_billing_dispute(&a.user_id, &a.reason),
    ));
    c.register(OperationTool::new(
        "get_package_id_by_name",
        "Paket adından paket ID'sini bulur. Resolves a package name to its id.",
        ops.clone(),
        |o, a: PackageNameArgs| o.get_package_id_by_name(&a.package_name),
    ));
    c.register(OperationTool::new(
        "get_line_status",
        "Hattın durumunu getirir (faturalı, faturasız, askıda). Line status.",
        ops.clone(),
        |o, a: UserArgs| o.get_line_status(&a.user_id),
    ));
    c.register(OperationTool::new(
        "pay_bill",
        "Ödenmemiş faturayı öder (tutar, yöntem: kredi kartı, havale, mobil ödeme). Pays an unpaid bill.",
        ops.clone(),
        |o, a: PaymentArgs| o.pay_bill(&a.user_id, a.amount, &a.method),
    ));
    c.register(OperationTool::new(
        "get_outstanding_balance",
        "Toplam ödenmemiş fatura borcunu getirir. Total unpaid balance.",
        ops.clone(),
        |o, a: UserArgs| o.get_outstanding_balance(&a.user_id),
    ));
    c.register(OperationTool::new(
        "cancel_support_ticket",
        "Destek talebini iptal eder. Cancels a support ticket.",
        ops.clone(),
        |o, a: TicketArgs| o.cancel_support_ticket(&a.user_id, &a.ticket_id),
    ));
    c.register(OperationTool::new(
        "get_ticket_status",
        "Destek talebinin durumunu getirir. Status of a support ticket.",
        ops.clone(),
        |o, a: TicketArgs| o.get_ticket_status(&a.user_id, &a.ticket_id),
    ));
    c.register(OperationTool::new(
        "create_support_ticket",
        "Hizmet türü ve açıklama ile destek talebi oluşturur. Creates a support ticket.",
        ops.clone(),
        |o, a: NewTicketArgs| o.create_support_ticket(&a.user_id, &a.service_type, &a.description),
    ));
    c.register(OperationTool::new(
        "join_campaign",
        "Kampanyaya katılım sağlar. Joins a campaign by id.",
        ops.clone(),
        |o, a: CampaignArgs| o.join_campaign(&a.user_id, &a.campaign_id),
    ));
    c.register(OperationTool::new(
        "get_campaigns",
        "Katılınabilecek aktif kampanyaları listeler. Active campaigns the user has not joined.",
        ops,
        |o, a: UserArgs| o.get_campaigns(&a.user_id),
    ));
    c
}
