//! `pageToken` pagination support.

use std::collections::VecDeque;
use std::sync::Arc;

use http::Method;
use serde::de::DeserializeOwned;

use crate::client::{Api, ClientInner};
use crate::error::GcpError;
use crate::http_client::HttpClient;
use crate::models::Paginated;

/// An async page stream that lazily fetches pages from a paginated endpoint.
///
/// Owns all its state (via `Arc`) so there are no lifetime parameters.
pub struct PageStream<C: HttpClient, Page: Paginated + DeserializeOwned> {
    inner: Arc<ClientInner<C>>,
    api: Api,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    page_token: Option<String>,
    buffer: VecDeque<Page::Item>,
    done: bool,
}

impl<C: HttpClient, Page: Paginated + DeserializeOwned> PageStream<C, Page> {
    pub(crate) fn new(
        inner: Arc<ClientInner<C>>,
        api: Api,
        segments: Vec<String>,
        query: Vec<(String, String)>,
    ) -> Self {
        Self {
            inner,
            api,
            segments,
            query,
            page_token: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Fetch the next individual item, requesting new pages as needed.
    ///
    /// Returns `Ok(None)` when all pages have been exhausted.
    pub async fn next(&mut self) -> Result<Option<Page::Item>, GcpError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            match self.next_page().await? {
                Some(page) => self.buffer = VecDeque::from(page.items()),
                None => return Ok(None),
            }
        }
    }

    /// Collect all remaining items into a `Vec`.
    pub async fn collect(mut self) -> Result<Vec<Page::Item>, GcpError> {
        let mut all = Vec::new();
        while let Some(item) = self.next().await? {
            all.push(item);
        }
        Ok(all)
    }

    /// Fetch the next full page.
    ///
    /// Returns `Ok(None)` when all pages have been exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Page>, GcpError> {
        if self.done {
            return Ok(None);
        }
        let page = self.fetch_page().await?;
        self.page_token = page.next_page_token().map(ToOwned::to_owned);
        self.done = self.page_token.is_none();
        Ok(Some(page))
    }

    async fn fetch_page(&self) -> Result<Page, GcpError> {
        let segments: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        let mut query: Vec<(&str, &str)> = self
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        if let Some(ref token) = self.page_token {
            query.push(("pageToken", token));
        }

        self.inner
            .request(Method::GET, self.api, &segments, &query, None::<&()>)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    use crate::client::{ClientBuilder, GcpClient};
    use crate::error::HttpClientError;
    use crate::http_client::{HttpClient, HttpRequest, HttpResponse};

    /// Replays canned bodies in order and records every URL requested.
    #[derive(Default)]
    struct Replay {
        bodies: Mutex<Vec<&'static str>>,
        urls: Mutex<Vec<String>>,
    }

    impl HttpClient for Replay {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
            self.urls.lock().expect("test mutex").push(request.url);
            let body = self.bodies.lock().expect("test mutex").remove(0);
            Ok(HttpResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    fn client(bodies: Vec<&'static str>) -> GcpClient<Replay> {
        ClientBuilder::new("token")
            .storage_url("http://fake/storage/v1")
            .build_with(Replay {
                bodies: Mutex::new(bodies),
                urls: Mutex::default(),
            })
    }

    #[tokio::test]
    async fn follows_page_tokens_until_exhausted() {
        let client = client(vec![
            r#"{"items":[{"name":"a"},{"name":"b"}],"nextPageToken":"t1"}"#,
            r#"{"items":[{"name":"c"}]}"#,
        ]);
        let names: Vec<String> = client
            .storage()
            .list_buckets("proj")
            .collect()
            .await
            .expect("listing succeeds")
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let urls = client.inner_http().urls.lock().expect("test mutex").clone();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "http://fake/storage/v1/b?project=proj");
        assert_eq!(urls[1], "http://fake/storage/v1/b?project=proj&pageToken=t1");
    }

    #[tokio::test]
    async fn empty_listing_is_one_request() {
        let client = client(vec!["{}"]);
        let buckets = client
            .storage()
            .list_buckets("proj")
            .collect()
            .await
            .expect("listing succeeds");
        assert!(buckets.is_empty());
        assert_eq!(client.inner_http().urls.lock().expect("test mutex").len(), 1);
    }
}
