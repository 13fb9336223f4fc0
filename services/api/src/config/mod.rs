pub mod handlers;

use axum::routing::get;
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/config",
            get(handlers::list_confs).post(handlers::create_conf),
        )
        .route(
            "/config/{id}",
            get(handlers::get_conf)
                .put(handlers::update_conf)
                .delete(handlers::delete_conf),
        )
}
