//! Shared runtime state for gd-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The cart service is the
//! only thing here that touches the database or the commerce API.

use std::sync::Arc;
use std::time::Duration;

use gd_cart::CartService;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    Status(StatusSnapshot),
    LogLine {
        level: String,
        msg: String,
    },
    /// A donor's cart changed. `action` is add | update | remove | reconcile.
    CartChanged {
        donor_id: String,
        action: String,
        /// Lines after the change; not reported for reconcile.
        line_count: Option<usize>,
    },
    OrderFinalized {
        donor_id: String,
        store: String,
        order_id: Uuid,
        request_id: String,
    },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Status(_) => "status",
            BusMsg::LogLine { .. } => "log",
            BusMsg::CartChanged { .. } => "cart",
            BusMsg::OrderFinalized { .. } => "order",
        }
    }
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Returned by GET /v1/status and carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// "SANDBOX" | "PRODUCTION"
    pub mode: String,
    pub config_hash: Option<String>,
    /// Name of the commerce adapter in use ("rye" in a real deployment).
    pub commerce: String,
    pub recreate_expired: bool,
    /// Successful cart mutations since boot.
    pub cart_mutations: u64,
    /// Orders recorded since boot (AlreadyFinalized not counted).
    pub orders_finalized: u64,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub status: Arc<RwLock<StatusSnapshot>>,
    pub cart: CartService,
}

impl AppState {
    /// Sandbox mode, no config hash.
    pub fn new(cart: CartService) -> Self {
        Self::with_config(cart, "SANDBOX", None)
    }

    pub fn with_config(cart: CartService, mode: &str, config_hash: Option<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            mode: mode.to_string(),
            config_hash,
            commerce: cart.commerce_name().to_string(),
            recreate_expired: cart.settings().recreate_expired,
            cart_mutations: 0,
            orders_finalized: 0,
        };

        Self {
            bus,
            build: BuildInfo {
                service: "gd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            status: Arc::new(RwLock::new(initial_status)),
            cart,
        }
    }

    /// Bump the mutation counter and announce the change.
    pub async fn cart_changed(&self, donor_id: &str, action: &str, line_count: Option<usize>) {
        self.status.write().await.cart_mutations += 1;
        let _ = self.bus.send(BusMsg::CartChanged {
            donor_id: donor_id.to_string(),
            action: action.to_string(),
            line_count,
        });
    }

    /// Surface a notable event on the SSE `log` stream.
    pub fn log_line(&self, level: &str, msg: impl Into<String>) {
        let _ = self.bus.send(BusMsg::LogLine {
            level: level.to_string(),
            msg: msg.into(),
        });
    }

    pub async fn order_finalized(&self, donor_id: &str, store: &str, order_id: Uuid, request_id: &str) {
        self.status.write().await.orders_finalized += 1;
        let _ = self.bus.send(BusMsg::OrderFinalized {
            donor_id: donor_id.to_string(),
            store: store.to_string(),
            order_id,
            request_id: request_id.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
