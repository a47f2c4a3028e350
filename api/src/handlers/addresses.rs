use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::handlers::ListQuery;
use crate::pagination::Pagination;
use crate::views;
use crate::ApiContext;

pub(crate) async fn detail(
    State(ctx): State<Arc<ApiContext>>,
    Path(address): Path<String>,
) -> ApiResult<Json<Value>> {
    let row = ctx
        .reader
        .address(&address)
        .await?
        .ok_or(ApiError::NotFound)?;
    let pending = ctx.reader.address_pending_balance(&address).await?;
    Ok(Json(views::address_json(&row, pending)))
}

pub(crate) async fn balance(
    State(ctx): State<Arc<ApiContext>>,
    Path(address): Path<String>,
) -> ApiResult<Json<Value>> {
    let row = ctx
        .reader
        .address(&address)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(json!(row.balance.as_coins())))
}

pub(crate) async fn pending(
    State(ctx): State<Arc<ApiContext>>,
    Path(address): Path<String>,
) -> ApiResult<Json<Value>> {
    ctx.reader
        .address(&address)
        .await?
        .ok_or(ApiError::NotFound)?;
    let pending = ctx.reader.address_pending_balance(&address).await?;
    Ok(Json(json!(pending.as_coins())))
}

pub(crate) async fn mutations(
    State(ctx): State<Arc<ApiContext>>,
    Path(address): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    ctx.reader
        .address(&address)
        .await?
        .ok_or(ApiError::NotFound)?;

    let page = Pagination::resolve(query.start, query.limit, None, None, false);
    let confirmed = match query.confirmed.as_deref() {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    };
    let rows = ctx
        .reader
        .address_mutations(&address, confirmed, page.start, page.limit)
        .await?;
    let rendered: Vec<Value> = rows.iter().map(views::address_mutation_json).collect();
    Ok(Json(Value::Array(rendered)))
}
