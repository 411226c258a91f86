//! HTTP mutation API.
//!
//! `POST /?txt=<v>[&txt=<v>...]` replaces the published TXT record set.
//! Empty values are filtered; the set is applied in request order. Five
//! seconds after a successful mutation a NOTIFY broadcast and a state-file
//! rewrite run in the background, so bursts of posts coalesce.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::time::Duration;
use tracing::{error, info};

use crate::dnssec::Signer;
use crate::notify::TransferNotifier;
use crate::state::StateFile;

const MUTATION_SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ApiState {
    pub signer: Arc<Signer>,
    pub notifier: Option<TransferNotifier>,
    pub state_file: Option<Arc<StateFile>>,
}

pub struct HttpApi {
    state: ApiState,
    bind_addr: SocketAddr,
}

impl HttpApi {
    pub fn new(state: ApiState, bind_addr: SocketAddr) -> Self {
        HttpApi { state, bind_addr }
    }

    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = router(self.state);

        info!("Starting HTTP server on {}", self.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new().route("/", post(set_records)).with_state(state)
}

async fn set_records(
    State(state): State<ApiState>,
    Query(params): Query<Vec<(String, String)>>,
) -> StatusCode {
    let now = Instant::now();

    let values: Vec<&str> = params
        .iter()
        .filter(|(key, value)| key == "txt" && !value.is_empty())
        .map(|(_, value)| value.as_str())
        .collect();

    if values.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    let records = values
        .iter()
        .map(|value| state.signer.txt_record(value))
        .collect();

    if let Err(e) = state.signer.add(records).await {
        error!("Failed to queue TXT records: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    tokio::spawn(async move {
        tokio::time::sleep(MUTATION_SETTLE_DELAY).await;
        if let Some(notifier) = &state.notifier {
            notifier.notify();
        }
        if let Some(state_file) = &state.state_file {
            state_file.store(now);
        }
    });

    StatusCode::OK
}
