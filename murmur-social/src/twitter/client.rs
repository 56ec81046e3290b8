//! Thin wrapper around the Twitter/X v2 recent-search endpoint.
//!
//! The caller owns the time window; this client only renders it as RFC 3339
//! bounds, so the window must already satisfy the API's constraints (within
//! the last seven days, ending at least ten seconds before now). The trailing
//! one-minute windows the crawler uses always do.
use crate::twitter::types::{SearchResponse, Tweet};
use crate::{FetchError, WindowFetcher};
use async_trait::async_trait;
use murmur_common::{Item, TimeWindow};
use murmur_http::{Auth, HttpClient, HttpError, RequestOpts};
use std::borrow::Cow;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const TWITTER_API_BASE: &str = "https://api.twitter.com";
const RECENT_SEARCH_PATH: &str = "2/tweets/search/recent";

/// The endpoint rejects `max_results` outside this range.
const MIN_PAGE: u32 = 10;
const MAX_PAGE: u32 = 100;

#[derive(Clone)]
pub struct TwitterApi {
    http: HttpClient,
    bearer: String,
    retries: usize,
}

impl TwitterApi {
    /// Client against the public API.
    ///
    /// ```
    /// use murmur_social::TwitterApi;
    ///
    /// let api = TwitterApi::new("AAAA-bearer".to_string()).unwrap();
    /// assert_eq!(api.base_url(), "https://api.twitter.com/");
    /// ```
    pub fn new(bearer_token: String) -> Result<Self, HttpError> {
        Self::with_base_url(TWITTER_API_BASE, bearer_token)
    }

    /// Client against another host (a proxy, or a mock server in tests).
    pub fn with_base_url(base: &str, bearer_token: String) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(base)?,
            bearer: bearer_token,
            retries: 0,
        })
    }

    /// Let the HTTP client retry 429/5xx responses this many times.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn base_url(&self) -> &str {
        self.http.base().as_str()
    }

    /// One page of recent-search results for `query` inside `window`.
    pub async fn recent_search(
        &self,
        query: &str,
        window: &TimeWindow,
        max_results: u32,
    ) -> Result<SearchResponse, FetchError> {
        let (start, end) = window.to_rfc3339()?;
        let max_results = max_results.clamp(MIN_PAGE, MAX_PAGE);

        let params: Vec<(&str, Cow<'_, str>)> = vec![
            ("query", query.into()),
            ("tweet.fields", "created_at".into()),
            ("start_time", start.into()),
            ("end_time", end.into()),
            ("max_results", max_results.to_string().into()),
        ];

        let resp: SearchResponse = self
            .http
            .get_json(
                RECENT_SEARCH_PATH,
                RequestOpts {
                    auth: Some(Auth::Bearer(&self.bearer)),
                    query: Some(params),
                    retries: Some(self.retries),
                    ..Default::default()
                },
            )
            .await?;

        let meta = resp.meta.clone().unwrap_or_default();
        tracing::debug!(
            result_count=?meta.result_count,
            newest_id=?meta.newest_id,
            oldest_id=?meta.oldest_id,
            has_next=meta.next_token.is_some(),
            "twitter.search.page"
        );
        if let Some(errors) = &resp.errors {
            tracing::warn!(partial_errors=?errors, "twitter.search.partial_errors");
        }
        Ok(resp)
    }
}

/// Convert a search page into items, keeping the source order.
///
/// A page without `data` is an empty window. Any tweet whose `created_at`
/// is missing or unparsable rejects the whole page.
pub fn into_items(resp: SearchResponse) -> Result<Vec<Item>, FetchError> {
    resp.data
        .unwrap_or_default()
        .into_iter()
        .map(tweet_to_item)
        .collect()
}

fn tweet_to_item(tweet: Tweet) -> Result<Item, FetchError> {
    let Tweet {
        id,
        text,
        created_at,
    } = tweet;
    let Some(raw) = created_at else {
        return Err(FetchError::Malformed {
            id,
            reason: "missing created_at".to_string(),
        });
    };
    match OffsetDateTime::parse(&raw, &Rfc3339) {
        Ok(created_at) => Ok(Item {
            id,
            created_at,
            text,
        }),
        Err(e) => Err(FetchError::Malformed {
            id,
            reason: format!("created_at `{raw}` is not RFC 3339: {e}"),
        }),
    }
}

#[async_trait]
impl WindowFetcher for TwitterApi {
    async fn fetch(
        &self,
        query: &str,
        window: &TimeWindow,
        limit: u32,
    ) -> Result<Vec<Item>, FetchError> {
        let resp = self.recent_search(query, window, limit).await?;
        let mut items = into_items(resp)?;
        // The API never pages below ten, so a smaller limit is applied here.
        items.truncate(limit as usize);
        Ok(items)
    }
}
