//! The pagination contract shared by every list endpoint.

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_INTERVAL_PAGE_SIZE: i64 = 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub start: i64,
    pub limit: i64,
    pub interval: Option<i64>,
}

impl Pagination {
    /// Resolves raw query parameters.
    ///
    /// A negative `start` anchors at the tip when the endpoint supports
    /// backwards indexing (`backwards_tip` carries tip + 1), and clamps to
    /// an empty window otherwise. `limit` defaults to 20 and caps at 100,
    /// or 1 000 when an interval filter is active.
    pub fn resolve(
        start: Option<i64>,
        limit: Option<i64>,
        interval: Option<i64>,
        backwards_tip: Option<i64>,
        allow_interval: bool,
    ) -> Pagination {
        let interval = if allow_interval {
            interval.filter(|interval| *interval > 0)
        } else {
            None
        };
        let max = if interval.is_some() {
            MAX_INTERVAL_PAGE_SIZE
        } else {
            MAX_PAGE_SIZE
        };

        let mut limit = limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit <= 0 || limit > max {
            limit = max;
        }

        let mut start = start.unwrap_or(if backwards_tip.is_some() {
            -DEFAULT_PAGE_SIZE
        } else {
            0
        });
        if start < 0 {
            match backwards_tip {
                Some(tip) => start = (tip + start).max(0),
                None => {
                    start = 0;
                    limit = 0;
                }
            }
        }

        Pagination {
            start,
            limit,
            interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_twenty_from_zero() {
        let page = Pagination::resolve(None, None, None, None, false);
        assert_eq!(page, Pagination { start: 0, limit: 20, interval: None });
    }

    #[test]
    fn backwards_endpoints_anchor_at_the_tip() {
        let page = Pagination::resolve(None, None, None, Some(101), false);
        assert_eq!(page.start, 81);
        assert_eq!(page.limit, 20);
    }

    #[test]
    fn negative_start_without_backwards_support_is_empty() {
        let page = Pagination::resolve(Some(-5), Some(10), None, None, false);
        assert_eq!(page.start, 0);
        assert_eq!(page.limit, 0);
    }

    #[test]
    fn limits_cap_at_one_hundred() {
        let page = Pagination::resolve(Some(0), Some(5_000), None, None, false);
        assert_eq!(page.limit, 100);
        let page = Pagination::resolve(Some(0), Some(0), None, None, false);
        assert_eq!(page.limit, 100);
    }

    #[test]
    fn interval_raises_the_cap() {
        let page = Pagination::resolve(Some(0), Some(500), Some(10), None, true);
        assert_eq!(page.limit, 500);
        assert_eq!(page.interval, Some(10));

        // intervals are ignored where not supported
        let page = Pagination::resolve(Some(0), Some(500), Some(10), None, false);
        assert_eq!(page.interval, None);
        assert_eq!(page.limit, 100);
    }

    #[test]
    fn non_positive_intervals_are_dropped() {
        let page = Pagination::resolve(Some(0), None, Some(0), None, true);
        assert_eq!(page.interval, None);
    }

    #[test]
    fn a_deep_negative_start_clamps_to_genesis() {
        let page = Pagination::resolve(Some(-500), None, None, Some(10), false);
        assert_eq!(page.start, 0);
    }
}
