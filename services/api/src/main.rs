mod config;
mod error;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use fieldsync_config::{init_tracing, AppConfig};
use fieldsync_db::conf::pg_repository::PgSyncerConfRepository;
use fieldsync_db::contacts::pg_repository::PgContactStore;
use fieldsync_db::lock::pg_repository::PgLockRepository;
use fieldsync_db::logs::pg_repository::PgSyncerLogRepository;
use fieldsync_engine::engine::{SyncEngine, SyncerRegistry};
use fieldsync_scheduler::Scheduler;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub conf_repo: PgSyncerConfRepository,
    pub registry: Arc<dyn SyncerRegistry>,
    pub auth_token: Option<String>,
}

async fn root() -> StatusCode {
    StatusCode::OK
}

/// Bearer-token gate for the /config routes; a pass-through when no token is
/// configured.
async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(token) = &state.auth_token {
        let expected = format!("Bearer {token}");
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == expected)
            .unwrap_or(false);

        if !authorized {
            let body = serde_json::json!({ "error": "invalid or missing auth token" });
            return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        }
    }
    next.run(request).await
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let config_routes = config::router().layer(middleware::from_fn_with_state(
        state.clone(),
        require_bearer,
    ));

    Router::new()
        .route("/", get(root))
        .merge(config_routes)
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let app_config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading configuration: {err}");
            std::process::exit(1);
        }
    };
    init_tracing(&app_config.log_level);
    tracing::info!(service = "fieldsync-api", "starting");

    let flows_pool = match fieldsync_db::create_pool(&app_config.flows_db).await {
        Ok(pool) => pool,
        Err(err) => fatal("error initializing flows db", err),
    };
    let store_pool = match fieldsync_db::create_store_pool(
        &app_config.syncer_db,
        Duration::from_secs(app_config.store_connect_timeout_secs),
    )
    .await
    {
        Ok(pool) => pool,
        Err(err) => fatal("error initializing syncer store", err),
    };
    if let Err(err) = fieldsync_db::ensure_store_schema(&store_pool).await {
        fatal("error bootstrapping syncer store schema", err);
    }

    let conf_repo = PgSyncerConfRepository::new(store_pool.clone());
    let engine = SyncEngine::new(
        conf_repo.clone(),
        PgSyncerLogRepository::new(store_pool.clone()),
        PgLockRepository::new(store_pool),
        PgContactStore::new(flows_pool),
        Scheduler::new(),
        app_config.batch_size,
        app_config.max_workers,
    );

    if let Err(err) = engine.load_syncers().await {
        fatal("error loading syncers", err);
    }
    engine.start_log_cleaner();
    engine.start_syncers();
    tracing::info!("sync engine started");

    let state = AppState {
        conf_repo,
        registry: Arc::new(engine.clone()),
        auth_token: app_config.auth_token.clone(),
    };
    let app = build_router(state);

    let addr: SocketAddr = match app_config.bind_addr().parse() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::error!(error = %err, "invalid bind address");
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, "failed to bind api listener");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "listening");
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");

    // The deadline bounds the admin drain; the engine closes either way.
    match tokio::time::timeout(SHUTDOWN_DEADLINE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => tracing::error!(error = %err, "api server error"),
        Ok(Err(err)) => tracing::error!(error = %err, "api server task failed"),
        Err(_) => {
            tracing::warn!("admin drain deadline exceeded, terminating open connections")
        }
    }

    engine.close().await;
    tracing::info!("fieldsync stopped");
}

fn fatal(context: &str, err: fieldsync_common::error::SyncerError) -> ! {
    tracing::error!(error = %err, "{context}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use fieldsync_common::error::SyncerResult;
    use fieldsync_db::conf::models::SyncerConf;
    use fieldsync_db::conf::repositories::SyncerConfRepository;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct StubRegistry {
        registered: Arc<Mutex<Vec<String>>>,
        unregistered: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SyncerRegistry for StubRegistry {
        async fn register_syncer(&self, conf: SyncerConf) -> SyncerResult<()> {
            self.registered.lock().unwrap().push(conf.id);
            Ok(())
        }

        async fn unregister_syncer(&self, conf: &SyncerConf) -> SyncerResult<()> {
            self.unregistered.lock().unwrap().push(conf.id.clone());
            Ok(())
        }
    }

    async fn test_state() -> Option<(AppState, StubRegistry)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = fieldsync_db::create_pool(&url).await.expect("db should connect");
        fieldsync_db::ensure_store_schema(&pool)
            .await
            .expect("schema bootstrap");

        let registry = StubRegistry::default();
        let state = AppState {
            conf_repo: PgSyncerConfRepository::new(pool),
            registry: Arc::new(registry.clone()),
            auth_token: None,
        };
        Some((state, registry))
    }

    fn conf_body(org_id: i64) -> serde_json::Value {
        serde_json::json!({
            "service": {
                "name": "crm",
                "type": "sql",
                "access": {"dsn": "postgres://localhost/crm"}
            },
            "sync_rules": {
                "schedule_times": ["04:30"],
                "org_id": org_id,
                "admin_id": 7
            },
            "table": {
                "name": "customers",
                "relation_type": "contact",
                "relation_column": "uuid",
                "columns": [
                    {"name": "region", "field_map_name": "region"}
                ]
            }
        })
    }

    async fn read_body(resp: axum::http::Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_conf(body: &serde_json::Value) -> Request<Body> {
        Request::post("/config")
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn rand_org() -> i64 {
        (Uuid::new_v4().as_u128() % 1_000_000_000) as i64
    }

    #[tokio::test]
    async fn root_returns_ok() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state);
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_conf_persists_and_registers() {
        let (state, registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state);
        let resp = app.oneshot(post_conf(&conf_body(rand_org()))).await.unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = read_body(resp).await;
        let id = body["id"].as_str().expect("id assigned");
        assert!(!id.is_empty());
        assert_eq!(body["is_active"], true);
        assert_eq!(*registry.registered.lock().unwrap(), vec![id.to_owned()]);
    }

    #[tokio::test]
    async fn create_conf_rejects_bad_schedule_time() {
        let (state, registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state);
        let mut body = conf_body(rand_org());
        body["sync_rules"]["schedule_times"] = serde_json::json!(["25:99"]);

        let resp = app.oneshot(post_conf(&body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp_body = read_body(resp).await;
        assert!(resp_body["error"].as_str().unwrap().contains("schedule time"));
        assert!(registry.registered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_conf_defaults_empty_schedule_times_to_now() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state);
        let mut body = conf_body(rand_org());
        body["sync_rules"]["schedule_times"] = serde_json::json!([]);

        let resp = app.oneshot(post_conf(&body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp_body = read_body(resp).await;
        let times = resp_body["sync_rules"]["schedule_times"]
            .as_array()
            .expect("schedule_times present");
        assert_eq!(times.len(), 1);
        let mark = times[0].as_str().unwrap();
        assert!(
            chrono::NaiveTime::parse_from_str(mark, "%H:%M").is_ok(),
            "defaulted mark is not HH:MM: {mark}"
        );
    }

    #[tokio::test]
    async fn get_conf_returns_stored_document() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state.clone());
        let resp = app.oneshot(post_conf(&conf_body(rand_org()))).await.unwrap();
        let created = read_body(resp).await;
        let id = created["id"].as_str().unwrap();

        let app = build_router(state);
        let resp = app
            .oneshot(Request::get(format!("/config/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_body(resp).await;
        assert_eq!(body["table"]["name"], "customers");
    }

    #[tokio::test]
    async fn get_missing_conf_returns_404() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::get("/config/no-such-conf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = read_body(resp).await;
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn list_confs_filters_by_org() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let org = rand_org();
        let other = rand_org();
        for body in [conf_body(org), conf_body(org), conf_body(other)] {
            let app = build_router(state.clone());
            app.oneshot(post_conf(&body)).await.unwrap();
        }

        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::get(format!("/config?org_id={org}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = read_body(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_active_conf_reregisters() {
        let (state, registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state.clone());
        let resp = app.oneshot(post_conf(&conf_body(rand_org()))).await.unwrap();
        let created = read_body(resp).await;
        let id = created["id"].as_str().unwrap().to_owned();

        let mut update = created.clone();
        update["table"]["name"] = serde_json::json!("orders");
        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::put(format!("/config/{id}"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(serde_json::to_vec(&update).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(*registry.unregistered.lock().unwrap(), vec![id.clone()]);
        // Registered on create and again on update.
        assert_eq!(*registry.registered.lock().unwrap(), vec![id.clone(), id]);
    }

    #[tokio::test]
    async fn update_inactive_conf_only_unregisters() {
        let (state, registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state.clone());
        let resp = app.oneshot(post_conf(&conf_body(rand_org()))).await.unwrap();
        let created = read_body(resp).await;
        let id = created["id"].as_str().unwrap().to_owned();

        let mut update = created.clone();
        update["is_active"] = serde_json::json!(false);
        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::put(format!("/config/{id}"))
                    .header("Content-Type", "application/json")
                    .body(Body::from(serde_json::to_vec(&update).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(*registry.unregistered.lock().unwrap(), vec![id.clone()]);
        assert_eq!(*registry.registered.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn update_missing_conf_returns_404() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::put("/config/no-such-conf")
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&conf_body(rand_org())).unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_conf_returns_204() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state.clone());
        let resp = app.oneshot(post_conf(&conf_body(rand_org()))).await.unwrap();
        let created = read_body(resp).await;
        let id = created["id"].as_str().unwrap();

        let app = build_router(state.clone());
        let resp = app
            .oneshot(
                Request::delete(format!("/config/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let app = build_router(state);
        let resp = app
            .oneshot(Request::get(format!("/config/{id}")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_missing_conf_returns_404() {
        let (state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::delete("/config/no-such-conf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn config_routes_require_token_when_configured() {
        let (mut state, _registry) = match test_state().await {
            Some(s) => s,
            None => return,
        };
        state.auth_token = Some("secret".to_owned());

        let app = build_router(state.clone());
        let resp = app
            .oneshot(Request::get("/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let app = build_router(state.clone());
        let resp = app
            .oneshot(
                Request::get("/config")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let app = build_router(state.clone());
        let resp = app
            .oneshot(
                Request::get("/config")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // The health root stays open.
        let app = build_router(state);
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
