use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;

use tollgate_auth::{
    Clock, GrantCoordinator, InMemoryClientStorage, InMemoryTokenStore, InMemoryUserStorage,
    SystemClock, TokenState, TokenStore, oauth_router,
};
use tollgate_auth_postgres::PostgresTokenStore;

use crate::config::{AppConfig, HousekeepingConfig, StorageBackend};

pub struct TollgateServer {
    addr: SocketAddr,
    app: Router,
    store: Arc<dyn TokenStore>,
    housekeeping: HousekeepingConfig,
}

pub fn build_app(coordinator: Arc<GrantCoordinator>, cfg: &AppConfig) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(oauth_router(TokenState::new(coordinator)))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            cfg.server.body_limit_bytes,
        ))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Open the configured token store.
pub async fn build_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn TokenStore>> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory token store; tokens do not survive a restart");
            Ok(Arc::new(InMemoryTokenStore::new()))
        }
        StorageBackend::Postgres => {
            let store = PostgresTokenStore::from_config(&cfg.storage.postgres).await?;
            store.create_tables_if_not_exist().await?;
            Ok(Arc::new(store))
        }
    }
}

/// Wire the grant coordinator to the store and the static registrations.
pub fn build_coordinator(
    cfg: &AppConfig,
    store: Arc<dyn TokenStore>,
) -> anyhow::Result<GrantCoordinator> {
    let clients = cfg
        .clients
        .iter()
        .fold(InMemoryClientStorage::new(), |storage, entry| {
            storage.with_client(entry.client.clone(), entry.secret.as_deref())
        });

    let mut coordinator = GrantCoordinator::new(store, Arc::new(clients), cfg.auth.clone())?;

    if !cfg.users.is_empty() {
        let users = cfg
            .users
            .iter()
            .fold(InMemoryUserStorage::new(), |storage, entry| {
                storage.with_user(entry.user.clone(), entry.password.clone())
            });
        coordinator = coordinator.with_user_storage(Arc::new(users));
    }

    tracing::info!(
        clients = cfg.clients.len(),
        users = cfg.users.len(),
        grant_types = ?cfg.auth.grant_types,
        "Grant coordinator ready"
    );

    Ok(coordinator)
}

/// Periodically remove expired codes and tokens.
pub fn spawn_purge_task(
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match store.purge_expired(clock.now()).await {
                Ok(stats) if stats.total() > 0 => {
                    tracing::info!(
                        codes = stats.codes,
                        access_tokens = stats.access_tokens,
                        refresh_tokens = stats.refresh_tokens,
                        "Purged expired tokens"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Token purge failed");
                }
                _ => {}
            }
        }
    })
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<TollgateServer> {
        let store = build_store(&self.config).await?;
        let coordinator = build_coordinator(&self.config, store.clone())?;
        let app = build_app(Arc::new(coordinator), &self.config);

        Ok(TollgateServer {
            addr: self.config.addr(),
            app,
            store,
            housekeeping: self.config.housekeeping,
        })
    }
}

impl TollgateServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let purge = self.housekeeping.enabled.then(|| {
            spawn_purge_task(
                self.store.clone(),
                Arc::new(SystemClock),
                self.housekeeping.purge_interval,
            )
        });

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = purge {
            handle.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tollgate_auth::{AuthorizationCode, Client, GrantType, ManualClock, TokenRepository};
    use tower::ServiceExt;

    fn config() -> AppConfig {
        AppConfig {
            clients: vec![ClientConfig {
                client: Client {
                    client_id: "svc".to_string(),
                    name: "Service".to_string(),
                    confidential: true,
                    active: true,
                    redirect_uris: vec![],
                    scopes: vec!["read".to_string()],
                    grant_types: vec![GrantType::ClientCredentials],
                },
                secret: Some("svc-secret".to_string()),
            }],
            ..AppConfig::default()
        }
    }

    async fn app() -> Router {
        let cfg = config();
        let store = build_store(&cfg).await.unwrap();
        let coordinator = build_coordinator(&cfg, store).unwrap();
        build_app(Arc::new(coordinator), &cfg)
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = app()
            .await
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_token_endpoint_mounted() {
        let response = app()
            .await
            .oneshot(
                Request::post("/oauth/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "grant_type=client_credentials&client_id=svc&client_secret=svc-secret",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("\"token_type\":\"Bearer\""));
        assert!(body.contains("\"scope\":\"read\""));
    }

    #[tokio::test]
    async fn test_grant_outside_allow_list_rejected() {
        let response = app()
            .await
            .oneshot(
                Request::post("/oauth/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "grant_type=password&username=a&password=b&client_id=svc&client_secret=svc-secret",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("unauthorized_client"));
    }

    #[tokio::test]
    async fn test_purge_task_removes_expired_codes() {
        let store = InMemoryTokenStore::new();
        let now = time::OffsetDateTime::UNIX_EPOCH + time::Duration::days(20_000);
        store
            .create_code(&AuthorizationCode {
                code: "stale".to_string(),
                client_id: "C1".to_string(),
                user_id: "U1".to_string(),
                scope: "read".to_string(),
                redirect_uri: None,
                created_at: now - time::Duration::minutes(20),
                expires_at: now - time::Duration::minutes(10),
            })
            .await
            .unwrap();

        let handle = spawn_purge_task(
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(now)),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(store.find_code("stale").await.unwrap().is_none());
    }
}
