use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_PURCHASE: &str = "/api/purchase";
pub const PATH_PAYMENT: &str = "/api/payment";
pub const PATH_PAYMENT_PROCESS: &str = "/api/payment/process";
pub const PATH_ITEM: &str = "/api/items/{id}";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: u64,
    pub name: String,
    pub price: i64,
}

#[derive(Debug, Clone)]
pub struct TestServerOptions {
    /// Catalogue with initial stock per item.
    pub items: Vec<(Item, i64)>,
    /// Added before every response.
    pub latency: Duration,
    /// Every n-th request answers 500 instead of being handled.
    pub fail_every: Option<NonZeroU64>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            items: vec![(
                Item {
                    id: 12,
                    name: "Flash Sale Item".to_string(),
                    price: 10_000,
                },
                100,
            )],
            latency: Duration::ZERO,
            fail_every: None,
        }
    }
}

impl TestServerOptions {
    pub fn with_stock(mut self, item_id: u64, stock: i64) -> Self {
        for (item, s) in &mut self.items {
            if item.id == item_id {
                *s = stock;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    purchases_ok: Arc<AtomicU64>,
    purchases_conflict: Arc<AtomicU64>,
    payments_processed: Arc<AtomicU64>,
    forced_failures: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn purchases_ok(&self) -> u64 {
        self.purchases_ok.load(Ordering::Relaxed)
    }

    pub fn purchases_conflict(&self) -> u64 {
        self.purchases_conflict.load(Ordering::Relaxed)
    }

    pub fn payments_processed(&self) -> u64 {
        self.payments_processed.load(Ordering::Relaxed)
    }

    pub fn forced_failures(&self) -> u64 {
        self.forced_failures.load(Ordering::Relaxed)
    }
}

struct StockedItem {
    item: Item,
    stock: AtomicI64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Order {
    id: u64,
    item_id: u64,
    item_name: String,
    user_id: u64,
    quantity: i64,
    total_amount: i64,
    status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Payment {
    id: u64,
    order_id: u64,
    amount: i64,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            code,
            message: message.into(),
        }),
    )
        .into_response()
}

struct ServerState {
    items: HashMap<u64, StockedItem>,
    orders: Mutex<HashMap<u64, Order>>,
    payments: Mutex<HashMap<u64, Payment>>,
    next_order_id: AtomicU64,
    next_payment_id: AtomicU64,
    latency: Duration,
    fail_every: Option<NonZeroU64>,
    stats: TestServerStats,
}

type SharedState = Arc<ServerState>;

impl ServerState {
    fn new(opts: TestServerOptions, stats: TestServerStats) -> Self {
        let items = opts
            .items
            .into_iter()
            .map(|(item, stock)| {
                (
                    item.id,
                    StockedItem {
                        item,
                        stock: AtomicI64::new(stock),
                    },
                )
            })
            .collect();

        Self {
            items,
            orders: Mutex::new(HashMap::new()),
            payments: Mutex::new(HashMap::new()),
            next_order_id: AtomicU64::new(1),
            next_payment_id: AtomicU64::new(1),
            latency: opts.latency,
            fail_every: opts.fail_every,
            stats,
        }
    }

    /// Counts the request, applies latency and returns a forced failure when due.
    async fn admit(&self) -> Option<Response> {
        let n = self.stats.requests_total.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        match self.fail_every {
            Some(every) if n % every.get() == 0 => {
                TestServerStats::inc(&self.stats.forced_failures);
                Some(error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "FORCED_FAILURE",
                    "forced failure",
                ))
            }
            _ => None,
        }
    }

    /// Takes `quantity` units if that many remain.
    fn take_stock(&self, item: &StockedItem, quantity: i64) -> bool {
        item.stock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s >= quantity).then_some(s - quantity)
            })
            .is_ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseQuery {
    item_id: u64,
    user_id: u64,
    #[serde(default = "default_quantity")]
    quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentQuery {
    order_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessQuery {
    payment_id: u64,
}

async fn handle_purchase(
    State(state): State<SharedState>,
    Query(q): Query<PurchaseQuery>,
) -> Response {
    if let Some(failure) = state.admit().await {
        return failure;
    }
    if q.quantity <= 0 {
        return error(
            StatusCode::BAD_REQUEST,
            "INVALID_QUANTITY",
            "quantity must be positive",
        );
    }
    let Some(item) = state.items.get(&q.item_id) else {
        return error(
            StatusCode::NOT_FOUND,
            "ITEM_NOT_FOUND",
            format!("item {} not found", q.item_id),
        );
    };
    if !state.take_stock(item, q.quantity) {
        TestServerStats::inc(&state.stats.purchases_conflict);
        return error(StatusCode::CONFLICT, "OUT_OF_STOCK", "item is sold out");
    }

    let order = Order {
        id: state.next_order_id.fetch_add(1, Ordering::Relaxed),
        item_id: item.item.id,
        item_name: item.item.name.clone(),
        user_id: q.user_id,
        quantity: q.quantity,
        total_amount: item.item.price.saturating_mul(q.quantity),
        status: "PENDING",
    };
    state
        .orders
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(order.id, order.clone());
    TestServerStats::inc(&state.stats.purchases_ok);

    Json(order).into_response()
}

async fn handle_payment(
    State(state): State<SharedState>,
    Query(q): Query<PaymentQuery>,
) -> Response {
    if let Some(failure) = state.admit().await {
        return failure;
    }
    let order = state
        .orders
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&q.order_id)
        .cloned();
    let Some(order) = order else {
        return error(
            StatusCode::NOT_FOUND,
            "ORDER_NOT_FOUND",
            format!("order {} not found", q.order_id),
        );
    };

    let payment = Payment {
        id: state.next_payment_id.fetch_add(1, Ordering::Relaxed),
        order_id: order.id,
        amount: order.total_amount,
        status: "PENDING",
    };
    state
        .payments
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(payment.id, payment.clone());

    Json(payment).into_response()
}

async fn handle_process(
    State(state): State<SharedState>,
    Query(q): Query<ProcessQuery>,
) -> Response {
    if let Some(failure) = state.admit().await {
        return failure;
    }
    let processed = {
        let mut payments = state
            .payments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        payments.get_mut(&q.payment_id).map(|p| {
            p.status = "COMPLETED";
            p.clone()
        })
    };
    match processed {
        Some(payment) => {
            TestServerStats::inc(&state.stats.payments_processed);
            Json(payment).into_response()
        }
        None => error(
            StatusCode::NOT_FOUND,
            "PAYMENT_NOT_FOUND",
            format!("payment {} not found", q.payment_id),
        ),
    }
}

#[derive(Debug, Serialize)]
struct ItemBody<'a> {
    #[serde(flatten)]
    item: &'a Item,
    stock: i64,
}

async fn handle_item(State(state): State<SharedState>, Path(id): Path<u64>) -> Response {
    if let Some(failure) = state.admit().await {
        return failure;
    }
    match state.items.get(&id) {
        Some(entry) => Json(ItemBody {
            item: &entry.item,
            stock: entry.stock.load(Ordering::Acquire),
        })
        .into_response(),
        None => error(
            StatusCode::NOT_FOUND,
            "ITEM_NOT_FOUND",
            format!("item {id} not found"),
        ),
    }
}

pub fn router(opts: TestServerOptions, stats: TestServerStats) -> Router {
    let state: SharedState = Arc::new(ServerState::new(opts, stats));
    Router::new()
        .route(PATH_PURCHASE, post(handle_purchase))
        .route(PATH_PAYMENT, post(handle_payment))
        .route(PATH_PAYMENT_PROCESS, post(handle_process))
        .route(PATH_ITEM, get(handle_item))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(TestServerOptions::default()).await
    }

    pub async fn start_with(opts: TestServerOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(opts, stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
