pub(crate) mod addresses;
pub(crate) mod blocks;
pub(crate) mod events;
pub(crate) mod stats;
pub(crate) mod transactions;

use serde::Deserialize;

/// Query parameters shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    pub start: Option<i64>,
    pub limit: Option<i64>,
    pub interval: Option<i64>,
    pub expand: Option<String>,
    pub confirmed: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SinceQuery {
    pub since: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChannelsQuery {
    pub channels: Option<String>,
}
