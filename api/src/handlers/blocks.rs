use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::Value;

use chaindex_store::BlockRow;

use crate::error::{ApiError, ApiResult};
use crate::handlers::ListQuery;
use crate::pagination::Pagination;
use crate::views::{self, Expand};
use crate::ApiContext;

/// Expansion-aware rendering of one block row.
async fn render_block(ctx: &ApiContext, block: &BlockRow, expand: &Expand) -> ApiResult<Value> {
    let miner = match (expand.wants("miner"), block.miner) {
        (true, Some(pool_id)) => ctx.reader.pool_by_id(pool_id).await?,
        _ => None,
    };
    let transactions = if expand.wants("transactions") {
        let rows = ctx.reader.block_transactions(block.id).await?;
        Some(
            rows.iter()
                .map(|tx| views::transaction_json(tx, &ctx.endpoint, Some(block)))
                .collect(),
        )
    } else {
        None
    };
    Ok(views::block_json(
        block,
        &ctx.endpoint,
        expand,
        miner.as_ref(),
        transactions,
    ))
}

pub(crate) async fn list(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let tip = ctx.reader.chaintip().await?;
    let backwards_tip = tip.and_then(|block| block.height).map(|height| height + 1);
    let page = Pagination::resolve(
        query.start,
        query.limit,
        query.interval,
        Some(backwards_tip.unwrap_or(0)),
        true,
    );
    let expand = Expand::parse(query.expand.as_deref());

    let blocks = ctx
        .reader
        .blocks(page.start, page.limit, page.interval)
        .await?;
    let mut rendered = Vec::with_capacity(blocks.len());
    for block in &blocks {
        rendered.push(render_block(&ctx, block, &expand).await?);
    }
    Ok(Json(Value::Array(rendered)))
}

pub(crate) async fn detail(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let block = ctx
        .reader
        .block_by_ident(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let expand = Expand::parse(query.expand.as_deref());
    Ok(Json(render_block(&ctx, &block, &expand).await?))
}

pub(crate) async fn miner(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let block = ctx
        .reader
        .block_by_ident(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let pool_id = block.miner.ok_or(ApiError::NotFound)?;
    let pool = ctx
        .reader
        .pool_by_id(pool_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(views::pool_json(&pool)))
}

pub(crate) async fn transactions(
    State(ctx): State<Arc<ApiContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let block = ctx
        .reader
        .block_by_ident(&id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let rows = ctx.reader.block_transactions(block.id).await?;
    let rendered: Vec<Value> = rows
        .iter()
        .map(|tx| views::transaction_json(tx, &ctx.endpoint, Some(&block)))
        .collect();
    Ok(Json(Value::Array(rendered)))
}
