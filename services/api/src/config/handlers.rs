use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::error::ApiError;
use crate::AppState;
use fieldsync_common::error::SyncerError;
use fieldsync_db::conf::models::SyncerConf;
use fieldsync_db::conf::repositories::SyncerConfRepository;

#[derive(Debug, Deserialize)]
pub struct ListFilter {
    pub org_id: Option<i64>,
}

pub async fn list_confs(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<SyncerConf>>, ApiError> {
    let confs = match filter.org_id {
        Some(org_id) => state.conf_repo.get_by_org_id(org_id).await?,
        None => state.conf_repo.get_all().await?,
    };
    Ok(Json(confs))
}

pub async fn get_conf(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncerConf>, ApiError> {
    let conf = state
        .conf_repo
        .get_by_id(&id)
        .await?
        .ok_or_else(|| ApiError(SyncerError::NotFound(format!("syncer conf not found: {id}"))))?;
    Ok(Json(conf))
}

pub async fn create_conf(
    State(state): State<AppState>,
    Json(mut conf): Json<SyncerConf>,
) -> Result<impl IntoResponse, ApiError> {
    if conf.sync_rules.schedule_times.is_empty() {
        conf.sync_rules.schedule_times = vec![Utc::now().format("%H:%M").to_string()];
    }
    conf.validate()?;

    let created = state.conf_repo.create(conf).await?;
    state.registry.register_syncer(created.clone()).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_conf(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut conf): Json<SyncerConf>,
) -> Result<StatusCode, ApiError> {
    conf.id = id.clone();
    conf.validate()?;

    state.conf_repo.update(&id, conf.clone()).await?;
    state.registry.unregister_syncer(&conf).await?;
    if conf.is_active {
        state.registry.register_syncer(conf).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_conf(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.conf_repo.delete(&id).await?;
    // TODO: unregister the live syncer here too; today it keeps firing until
    // the process restarts or the conf is updated to inactive first.
    Ok(StatusCode::NO_CONTENT)
}
