use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::Json;
use serde_json::{json, Value};

use chaindex_types::Hash256;

use crate::error::{ApiError, ApiResult};
use crate::handlers::{ListQuery, SinceQuery};
use crate::pagination::Pagination;
use crate::views;
use crate::ApiContext;

pub(crate) async fn network(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Json<Value>> {
    let blocks = ctx.reader.block_stats(query.since).await?;
    let transactions = ctx.reader.transaction_stats(query.since).await?;
    Ok(Json(json!({
        "blocks": {
            "amount": blocks.blocks,
        },
        "transactions": {
            "amount": transactions.transactions,
            "totalvalue": transactions.transactedvalue.as_coins(),
        },
    })))
}

pub(crate) async fn pools(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Json<Value>> {
    let stats = ctx.reader.pool_stats(query.since.unwrap_or(0)).await?;
    let rendered: Vec<Value> = stats
        .iter()
        .map(|pool| {
            json!({
                "name": pool.name,
                "amountmined": pool.amountmined,
                "latestblock": pool.latestblock,
                "website": pool.website,
                "graphcolor": pool.graphcolor,
            })
        })
        .collect();
    Ok(Json(Value::Array(rendered)))
}

pub(crate) async fn richlist(
    State(ctx): State<Arc<ApiContext>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let page = Pagination::resolve(query.start, query.limit, None, None, false);
    let entries = ctx.reader.richlist(page.start, page.limit).await?;
    let rendered: Vec<Value> = entries.iter().map(views::richlist_json).collect();
    Ok(Json(Value::Array(rendered)))
}

pub(crate) async fn coins(State(ctx): State<Arc<ApiContext>>) -> ApiResult<Json<Value>> {
    let released = ctx.reader.total_coins_released().await?;
    let current = ctx.reader.total_coins_in_addresses().await?;
    Ok(Json(json!({
        "total": {
            "released": released.as_coins(),
            "current": current.as_coins(),
        },
    })))
}

/// How a search identifier can be interpreted before hitting the store.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum IdentShape {
    Height,
    Hash,
    Address,
}

pub(crate) fn classify_ident(ident: &str) -> IdentShape {
    if !ident.is_empty() && ident.bytes().all(|byte| byte.is_ascii_digit()) {
        IdentShape::Height
    } else if ident.len() == 64 && ident.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        IdentShape::Hash
    } else {
        IdentShape::Address
    }
}

/// Classifies the identifier as height / block hash / txid / address and
/// redirects to the canonical resource.
pub(crate) async fn search(
    State(ctx): State<Arc<ApiContext>>,
    Path(ident): Path<String>,
) -> ApiResult<Redirect> {
    match classify_ident(&ident) {
        IdentShape::Height => {
            if ctx.reader.block_by_ident(&ident).await?.is_some() {
                return Ok(Redirect::temporary(&format!(
                    "{}/blocks/{ident}/",
                    ctx.endpoint
                )));
            }
        }
        IdentShape::Hash => {
            let hash: Hash256 = ident.parse().map_err(|_| ApiError::NotFound)?;
            if let Some(block) = ctx.reader.block_by_hash(&hash).await? {
                return Ok(Redirect::temporary(&format!(
                    "{}/blocks/{}/",
                    ctx.endpoint, block.hash
                )));
            }
            if let Some(tx) = ctx.reader.transaction(&hash).await? {
                return Ok(Redirect::temporary(&format!(
                    "{}/transactions/{}/",
                    ctx.endpoint, tx.txid
                )));
            }
        }
        IdentShape::Address => {
            if ctx.reader.address(&ident).await?.is_some() {
                return Ok(Redirect::temporary(&format!(
                    "{}/address/{ident}/",
                    ctx.endpoint
                )));
            }
        }
    }
    Err(ApiError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_classify_by_shape() {
        assert_eq!(classify_ident("123456"), IdentShape::Height);
        assert_eq!(
            classify_ident("00000000a1b2c3d4e5f60718293a4b5c6d7e8f9000000000a1b2c3d4e5f60718"),
            IdentShape::Hash
        );
        assert_eq!(classify_ident("GaddrSomething"), IdentShape::Address);
        assert_eq!(
            classify_ident("grlc1qw508d6qejxtdg4y5r3zarvary0c5xw7kq5xw7k"),
            IdentShape::Address
        );
        // 64 chars but not hex: treated as an address string
        assert_eq!(
            classify_ident(&"g".repeat(64)),
            IdentShape::Address
        );
    }
}
