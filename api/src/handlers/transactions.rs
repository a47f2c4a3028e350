use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::Value;

use chaindex_store::TransactionRow;
use chaindex_types::Hash256;

use crate::error::{ApiError, ApiResult};
use crate::handlers::ListQuery;
use crate::pagination::Pagination;
use crate::views;
use crate::ApiContext;

async fn render_transaction(ctx: &ApiContext, tx: &TransactionRow) -> ApiResult<Value> {
    let block = ctx.reader.confirming_block(tx).await?;
    Ok(views::transaction_json(tx, &ctx.endpoint, block.as_ref()))
}

async fn lookup(ctx: &ApiContext, txid: &str) -> ApiResult<TransactionRow> {
    let txid: Hash256 = txid.parse().map_err(|_| ApiError::NotFound)?;
    ctx.reader
        .transaction(&txid)
        .await?
        .ok_or(ApiError::NotFound)
}

pub(crate) async fn list(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let page = Pagination::resolve(query.start, query.limit, None, None, false);

    let rows = match query.confirmed.as_deref() {
        None | Some("") => ctx.reader.latest_transactions(page.limit, false).await?,
        Some("true") => ctx.reader.latest_transactions(page.limit, true).await?,
        Some("false") => ctx.reader.mempool(page.limit).await?,
        Some(_) => Vec::new(),
    };

    let mut rendered = Vec::with_capacity(rows.len());
    for tx in &rows {
        rendered.push(render_transaction(&ctx, tx).await?);
    }
    Ok(Json(Value::Array(rendered)))
}

pub(crate) async fn detail(
    State(ctx): State<Arc<ApiContext>>,
    Path(txid): Path<String>,
) -> ApiResult<Json<Value>> {
    let tx = lookup(&ctx, &txid).await?;
    Ok(Json(render_transaction(&ctx, &tx).await?))
}

pub(crate) async fn inputs(
    State(ctx): State<Arc<ApiContext>>,
    Path(txid): Path<String>,
) -> ApiResult<Json<Value>> {
    let tx = lookup(&ctx, &txid).await?;
    let details = ctx.reader.transaction_inputs(tx.id).await?;
    let rendered: Vec<Value> = details
        .iter()
        .map(|input| views::input_json(input, &ctx.endpoint))
        .collect();
    Ok(Json(Value::Array(rendered)))
}

pub(crate) async fn input(
    State(ctx): State<Arc<ApiContext>>,
    Path((txid, index)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    let tx = lookup(&ctx, &txid).await?;
    let details = ctx.reader.transaction_inputs(tx.id).await?;
    let detail = details
        .iter()
        .find(|input| input.idx == index)
        .ok_or(ApiError::NotFound)?;
    Ok(Json(views::input_json(detail, &ctx.endpoint)))
}

pub(crate) async fn outputs(
    State(ctx): State<Arc<ApiContext>>,
    Path(txid): Path<String>,
) -> ApiResult<Json<Value>> {
    let tx = lookup(&ctx, &txid).await?;
    let details = ctx.reader.transaction_outputs(tx.id).await?;
    let rendered: Vec<Value> = details.iter().map(views::output_json).collect();
    Ok(Json(Value::Array(rendered)))
}

pub(crate) async fn output(
    State(ctx): State<Arc<ApiContext>>,
    Path((txid, index)): Path<(String, i64)>,
) -> ApiResult<Json<Value>> {
    let tx = lookup(&ctx, &txid).await?;
    let details = ctx.reader.transaction_outputs(tx.id).await?;
    let detail = details
        .iter()
        .find(|output| output.idx == index)
        .ok_or(ApiError::NotFound)?;
    Ok(Json(views::output_json(detail)))
}

pub(crate) async fn mutations(
    State(ctx): State<Arc<ApiContext>>,
    Path(txid): Path<String>,
) -> ApiResult<Json<Value>> {
    let tx = lookup(&ctx, &txid).await?;
    let rows = ctx.reader.transaction_mutations(tx.id).await?;
    let rendered: Vec<Value> = rows.iter().map(views::transaction_mutation_json).collect();
    Ok(Json(Value::Array(rendered)))
}
