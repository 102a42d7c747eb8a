use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{routes, AppState};

/// The assembled HTTP application
#[derive(Clone)]
pub struct KeystoneApp {
    pub state: AppState,
    pub router: Router<()>,
}

impl KeystoneApp {
    pub fn new(state: AppState) -> Self {
        let body_limit = state.config.body_limit();

        let router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .nest("/uploads", routes::uploads::router())
            .nest("/galleries", routes::galleries::router())
            .with_state(state.clone())
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );

        Self { state, router }
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "keystone listening");
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}
