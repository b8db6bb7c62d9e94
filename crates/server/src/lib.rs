use axum::{
    extract::State,
    middleware,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use floorview_engine::{
    Coord, Effect, Frame, Msg, Notice, Phase, Reaction, SelectionPanel, SyncStats, Viewer,
};
use floorview_protocol::{targets, Patch, UiUpdate};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

pub mod poller;
pub mod simulator;

pub use poller::{spawn_poller, PollerHandle};
pub use simulator::SimulatorClient;


#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub simulator_url: String,
    pub request_timeout: Duration,
}

/// The viewer is the only mutable state. Handlers and the poll loop each apply one
/// message at a time and release the lock before any I/O.
#[derive(Clone)]
pub struct AppState {
    pub viewer: Arc<Mutex<Viewer>>,
    effects: mpsc::UnboundedSender<Effect>,
}

impl AppState {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Effect>) {
        let (effects, rx) = mpsc::unbounded_channel();
        let state = Self {
            viewer: Arc::new(Mutex::new(Viewer::new())),
            effects,
        };
        (state, rx)
    }

    /// Applies `msg` and queues its submit / reset-shift effects for the effect runner.
    /// Fetch effects are returned to the caller, which is always the poll loop.
    pub async fn dispatch(&self, msg: Msg) -> (Reaction, SelectionPanel) {
        let (reaction, panel) = {
            let mut viewer = self.viewer.lock().await;
            let reaction = viewer.handle(msg);
            (reaction, viewer.selection().panel())
        };
        for effect in &reaction.effects {
            if matches!(effect, Effect::SubmitTask(_) | Effect::ResetShift) {
                // Only fails once the runner is gone, i.e. during shutdown.
                let _ = self.effects.send(effect.clone());
            }
        }
        (reaction, panel)
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/api/view", get(api_view))
        .route("/api/cells/click", post(api_cell_click))
        .route("/api/selection/submit", post(api_selection_submit))
        .route("/api/selection/reset", post(api_selection_reset))
        .route("/api/shift/reset", post(api_shift_reset))
        .with_state(state)
        // Local security: allow only loopback + Tailscale by default.
        .layer(middleware::from_fn(ip_allowlist))
        // The viewer can create tasks on the simulator; never allow arbitrary origins.
        .layer(local_only_cors())
}

async fn health() -> &'static str {
    "ok"
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

#[derive(Debug, Serialize)]
pub struct CellView {
    pub classes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FrameView {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<CellView>,
}

impl From<&Frame> for FrameView {
    fn from(frame: &Frame) -> Self {
        Self {
            rows: frame.rows,
            cols: frame.cols,
            cells: frame
                .cells
                .iter()
                .map(|c| CellView {
                    classes: c.classes(),
                    label: c.label(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    #[serde(flatten)]
    pub phase: Phase,
    pub link: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub stats: SyncStats,
    pub selection: SelectionPanel,
    pub interval_ms: u64,
    pub frame: Option<FrameView>,
    pub generated_at: String,
}

async fn api_view(State(state): State<AppState>) -> Json<ViewResponse> {
    let viewer = state.viewer.lock().await;
    let phase = viewer.phase().clone();
    Json(ViewResponse {
        link: viewer.link().label(&phase),
        last_error: viewer.link().last_error.clone(),
        phase,
        stats: viewer.stats(),
        selection: viewer.selection().panel(),
        interval_ms: viewer.step_interval().as_millis() as u64,
        frame: viewer.frame().map(FrameView::from),
        generated_at: now_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
struct ClickInput {
    pub row: i64,
    pub col: i64,
}

async fn api_cell_click(
    State(state): State<AppState>,
    Json(input): Json<ClickInput>,
) -> Json<UiUpdate> {
    let msg = Msg::CellClicked(Coord::new(input.row, input.col));
    Json(ui_update("selection.click", state.dispatch(msg).await))
}

async fn api_selection_submit(State(state): State<AppState>) -> Json<UiUpdate> {
    Json(ui_update("selection.submit", state.dispatch(Msg::SubmitRequested).await))
}

async fn api_selection_reset(State(state): State<AppState>) -> Json<UiUpdate> {
    Json(ui_update("selection.reset", state.dispatch(Msg::ResetSelection).await))
}

async fn api_shift_reset(State(state): State<AppState>) -> Json<UiUpdate> {
    Json(ui_update("shift.reset", state.dispatch(Msg::ResetShiftRequested).await))
}

fn ui_update(event: &str, (reaction, panel): (Reaction, SelectionPanel)) -> UiUpdate {
    let accepted = !matches!(reaction.notice, Some(Notice::Rejected(_)));
    let patches = vec![
        Patch::replace(targets::PANEL_SELECTION, selection_html(&panel)),
        Patch::replace(targets::PANEL_HINT, hint_html(reaction.notice.as_ref())),
    ];
    UiUpdate::new(event, patches).with_payload(serde_json::json!({
        "accepted": accepted,
        "can_submit": panel.can_submit,
    }))
}

fn selection_html(panel: &SelectionPanel) -> String {
    format!(
        "<div>Pickup: <span id=\"pickup-pos\">{}</span></div><div>Drop: <span id=\"drop-pos\">{}</span></div>",
        html_escape::encode_text(&panel.pickup),
        html_escape::encode_text(&panel.drop)
    )
}

fn hint_html(notice: Option<&Notice>) -> String {
    match notice {
        Some(Notice::Info(text)) => format!(
            "<div class=\"hint-info\">{}</div>",
            html_escape::encode_text(text)
        ),
        Some(Notice::Rejected(text)) => format!(
            "<div class=\"hint-rejected\">{}</div>",
            html_escape::encode_text(text)
        ),
        None => String::new(),
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

pub async fn serve(addr: SocketAddr, config: ViewerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let client = SimulatorClient::new(config.simulator_url, config.request_timeout)?;
    serve_listener(listener, client, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    client: SimulatorClient,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let (state, effects) = AppState::new();
    let poller = spawn_poller(state.clone(), client, effects);
    let app = build_router(state);
    let addr = listener.local_addr()?;
    info!(%addr, "viewer listening");
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;
    poller.stop();
    poller.join().await;
    served?;
    Ok(addr)
}

async fn ip_allowlist(
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let ip = peer.ip();
    if is_allowed_peer_ip(ip) {
        return next.run(req).await;
    }
    (axum::http::StatusCode::FORBIDDEN, "forbidden").into_response()
}

fn is_allowed_peer_ip(ip: IpAddr) -> bool {
    if ip.is_loopback() {
        return true;
    }

    // Tailscale CGNAT range (100.64.0.0/10).
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 100 && (64..=127).contains(&o[1])
        }
        IpAddr::V6(_v6) => false,
    }
}

fn local_only_cors() -> CorsLayer {
    use axum::http::header;
    use axum::http::HeaderValue;
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            is_allowed_local_origin(origin)
        }))
}

fn is_allowed_local_origin(origin: &axum::http::HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };
    is_http_origin_for_host(s, "localhost") || is_http_origin_for_host(s, "127.0.0.1")
}

fn is_http_origin_for_host(origin: &str, host: &str) -> bool {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = origin.strip_prefix(scheme) {
            if let Some(after) = rest.strip_prefix(host) {
                // Origin is just scheme://host[:port]
                return after.is_empty() || after.starts_with(':');
            }
        }
    }
    false
}

const DASHBOARD_HTML: &str = r###"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Floorview</title>
  <style>
    :root{
      --bg:#081325; --panel:#0b1a2dcc; --edge:#73c7ff55; --ice:#e6fbff; --muted:#8aa3be;
      --ok:#4df5bf; --warn:#ffd06b; --bad:#ff7198; --cell:34px;
    }
    *{box-sizing:border-box;margin:0;padding:0}
    body{font-family:Inter,system-ui,sans-serif;color:var(--ice);background:var(--bg);padding:16px}
    .topbar{display:flex;justify-content:space-between;align-items:center;margin-bottom:12px}
    .topbar h1{font-size:15px;letter-spacing:.7px}
    .pill{display:flex;align-items:center;gap:8px;font-size:12px;color:var(--muted)}
    .dot{width:8px;height:8px;border-radius:99px;background:var(--warn)}
    .dot.online{background:var(--ok)}
    .dot.offline{background:var(--bad)}
    .layout{display:flex;gap:16px;align-items:flex-start}
    #grid{display:grid;gap:2px;grid-template-columns:repeat(var(--grid-cols,1),var(--cell))}
    .cell{width:var(--cell);height:var(--cell);border-radius:4px;background:#0c223b;
      display:flex;align-items:center;justify-content:center;font-size:11px;cursor:pointer;position:relative}
    .cell.obstacle{background:#3b4656;cursor:not-allowed}
    .cell.dynamic-obstacle{background:#7a4b2a;cursor:not-allowed}
    .cell.task-pickup{background:#1f6f4a}
    .cell.task-drop{background:#6f1f3a}
    .cell.robot{background:#2a6fd6;font-weight:700;cursor:not-allowed}
    .cell.robot-moving_to_pickup{background:#2ab0d6}
    .cell.robot-moving_to_drop{background:#d68a2a}
    .cell.robot-returning_to_depot{background:#8a6fd6}
    .cell.pending-move{box-shadow:inset 0 0 0 2px #ffd06b}
    .cell.selected-pickup{outline:2px solid var(--ok)}
    .cell.selected-drop{outline:2px solid var(--bad)}
    .side{width:280px;display:flex;flex-direction:column;gap:10px}
    .card{border:1px solid var(--edge);border-radius:12px;background:var(--panel);padding:10px;font-size:13px}
    .card .k{font-size:11px;color:var(--muted);margin-bottom:6px}
    .btn{border:1px solid #4f799f;background:#0b1b30;color:var(--ice);border-radius:8px;padding:6px 10px;cursor:pointer}
    .btn:disabled{opacity:.4;cursor:default}
    .hint-rejected{color:var(--bad)}
    .hint-info{color:var(--ok)}
  </style>
</head>
<body>
  <header class="topbar">
    <h1>FLOORVIEW</h1>
    <div class="pill"><span id="connDot" class="dot"></span><span id="connText">connecting</span></div>
  </header>
  <div class="layout">
    <main id="grid"></main>
    <aside class="side">
      <div class="card">
        <div class="k">Selection</div>
        <div id="panel.selection">
          <div>Pickup: <span id="pickup-pos">None</span></div>
          <div>Drop: <span id="drop-pos">None</span></div>
        </div>
        <div style="display:flex;gap:8px;margin-top:8px">
          <button id="create-task-btn" class="btn" type="button" disabled>create task</button>
          <button id="clear-selection-btn" class="btn" type="button">clear</button>
        </div>
        <div id="panel.hint" style="margin-top:8px"></div>
      </div>
      <div class="card">
        <div class="k">Shift</div>
        <button id="reset-shift-btn" class="btn" type="button">end shift</button>
      </div>
      <div class="card">
        <div class="k">Status</div>
        <div id="panel.status">waiting</div>
      </div>
    </aside>
  </div>
  <script>
  (function(){
    const $ = (id) => document.getElementById(id);
    const grid = $("grid");
    const createBtn = $("create-task-btn");
    let shape = "";
    let refreshMs = 200;

    function applyUpdate(u){
      if (!u || !Array.isArray(u.patches)) return;
      for (const p of u.patches){
        const t = document.getElementById(p.target);
        if (t && (p.swap === "replace" || !p.swap)) t.innerHTML = p.html || "";
      }
      if (u.payload) createBtn.disabled = !u.payload.can_submit;
    }

    async function post(path, body){
      const r = await fetch(path, {
        method: "POST",
        headers: { "content-type": "application/json" },
        body: body ? JSON.stringify(body) : "{}",
      });
      applyUpdate(await r.json());
      await refresh();
    }

    function ensureCells(frame){
      const key = frame.rows + "x" + frame.cols;
      if (key === shape) return;
      shape = key;
      grid.innerHTML = "";
      grid.style.setProperty("--grid-cols", frame.cols);
      for (let r = 0; r < frame.rows; r++){
        for (let c = 0; c < frame.cols; c++){
          const cell = document.createElement("div");
          cell.id = `cell-${r}-${c}`;
          cell.addEventListener("click", () => post("/api/cells/click", { row: r, col: c }));
          grid.appendChild(cell);
        }
      }
    }

    function draw(view){
      const dot = $("connDot");
      dot.className = "dot " + view.link;
      $("connText").textContent = view.link;
      $("panel.status").textContent = view.phase === "disconnected"
        ? `disconnected: ${view.reason}`
        : `frames ${view.stats.frames_rendered} | failed polls ${view.stats.polls_failed}` +
          (view.last_error ? ` | last error: ${view.last_error}` : "");
      $("pickup-pos") && ($("pickup-pos").textContent = view.selection.pickup);
      $("drop-pos") && ($("drop-pos").textContent = view.selection.drop);
      createBtn.disabled = !view.selection.can_submit;
      if (!view.frame) return;
      ensureCells(view.frame);
      view.frame.cells.forEach((cell, i) => {
        const el = grid.children[i];
        el.className = cell.classes.join(" ");
        el.textContent = cell.label || "";
      });
    }

    async function refresh(){
      try{
        const r = await fetch("/api/view", { cache: "no-store" });
        if (!r.ok) throw new Error("bad status");
        const view = await r.json();
        refreshMs = Math.max(50, view.interval_ms || 200);
        draw(view);
      }catch(_e){
        $("connDot").className = "dot offline";
        $("connText").textContent = "viewer offline";
      }
    }

    async function loop(){
      for(;;){
        await refresh();
        await new Promise(res => setTimeout(res, refreshMs));
      }
    }

    createBtn.addEventListener("click", () => post("/api/selection/submit"));
    $("clear-selection-btn").addEventListener("click", () => post("/api/selection/reset"));
    $("reset-shift-btn").addEventListener("click", () => post("/api/shift/reset"));
    loop();
  })();
  </script>
</body>
</html>
"###;
