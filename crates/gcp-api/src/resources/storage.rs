//! Cloud Storage resource.

use bytes::Bytes;
use http::header::RANGE;
use http::{HeaderMap, HeaderValue, Method, StatusCode};

use crate::client::{Api, GcpClient, ensure_success};
use crate::error::GcpError;
use crate::http_client::HttpClient;
use crate::models::{Bucket, ListBucketsResponse, ListObjectsResponse, Object, Policy};
use crate::pagination::PageStream;

/// Operations on buckets and objects.
pub struct StorageResource<'c, C: HttpClient> {
    client: &'c GcpClient<C>,
}

impl<'c, C: HttpClient> StorageResource<'c, C> {
    pub(crate) fn new(client: &'c GcpClient<C>) -> Self {
        Self { client }
    }

    /// Return a [`PageStream`] over every bucket of `project`.
    pub fn list_buckets(&self, project: &str) -> PageStream<C, ListBucketsResponse> {
        PageStream::new(
            self.client.inner.clone(),
            Api::Storage,
            vec!["b".to_owned()],
            vec![("project".to_owned(), project.to_owned())],
        )
    }

    /// Get a single bucket.
    pub async fn get_bucket(&self, bucket: &str) -> Result<Bucket, GcpError> {
        self.client
            .inner
            .request(Method::GET, Api::Storage, &["b", bucket], &[], None::<&()>)
            .await
    }

    /// List one level of `bucket` below `prefix`, following every page.
    ///
    /// Names containing `delimiter` past the prefix are folded into `prefixes`.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<ListObjectsResponse, GcpError> {
        let query = vec![
            ("prefix".to_owned(), prefix.to_owned()),
            ("delimiter".to_owned(), delimiter.to_owned()),
        ];
        let mut pages: PageStream<C, ListObjectsResponse> = PageStream::new(
            self.client.inner.clone(),
            Api::Storage,
            vec!["b".to_owned(), bucket.to_owned(), "o".to_owned()],
            query,
        );

        let mut listing = ListObjectsResponse::default();
        while let Some(page) = pages.next_page().await? {
            listing.absorb(page);
        }
        Ok(listing)
    }

    /// Get the metadata of a single object.
    pub async fn get_object(&self, bucket: &str, object: &str) -> Result<Object, GcpError> {
        self.client
            .inner
            .request(
                Method::GET,
                Api::Storage,
                &["b", bucket, "o", object],
                &[],
                None::<&()>,
            )
            .await
    }

    /// Read up to `len` bytes of an object's content starting at `offset`.
    ///
    /// A range starting at or past the end of the object reads as empty.
    pub async fn read_range(
        &self,
        bucket: &str,
        object: &str,
        offset: u64,
        len: u64,
    ) -> Result<Bytes, GcpError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let inner = &self.client.inner;
        let url = inner.url(
            Api::Storage,
            &["b", bucket, "o", object],
            &[("alt", "media")],
        )?;
        let last = offset.saturating_add(len - 1);
        let mut headers = HeaderMap::new();
        let range = HeaderValue::from_str(&format!("bytes={offset}-{last}"))
            .map_err(|e| GcpError::Url(e.to_string()))?;
        headers.insert(RANGE, range);

        let response = inner.execute(Method::GET, url, headers, None).await?;
        if response.status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        let response = ensure_success(response)?;
        let body = response.body;
        // A server ignoring the range answers 200 with the whole object.
        if response.status == StatusCode::OK {
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(body.len());
            let end = usize::try_from(offset.saturating_add(len))
                .unwrap_or(usize::MAX)
                .min(body.len());
            return Ok(body.slice(start..end));
        }
        Ok(body)
    }

    /// Get the IAM policy of a bucket.
    pub async fn bucket_iam_policy(&self, bucket: &str) -> Result<Policy, GcpError> {
        self.client
            .inner
            .request(
                Method::GET,
                Api::Storage,
                &["b", bucket, "iam"],
                &[],
                None::<&()>,
            )
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

    /// Answers every request with one status and body, keeping the last request.
    struct Fixed {
        status: StatusCode,
        body: &'static [u8],
        seen: Mutex<Option<HttpRequest>>,
    }

    impl HttpClient for Fixed {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
            *self.seen.lock().expect("test mutex") = Some(request);
            Ok(HttpResponse {
                status: self.status,
                headers: HeaderMap::new(),
                body: Bytes::from_static(self.body),
            })
        }
    }

    fn client(status: StatusCode, body: &'static [u8]) -> GcpClient<Fixed> {
        ClientBuilder::new("tok")
            .storage_url("http://fake/storage/v1/")
            .build_with(Fixed {
                status,
                body,
                seen: Mutex::new(None),
            })
    }

    fn last_request(client: &GcpClient<Fixed>) -> HttpRequest {
        client
            .inner_http()
            .seen
            .lock()
            .expect("test mutex")
            .clone()
            .expect("a request was sent")
    }

    #[tokio::test]
    async fn object_names_are_one_path_segment() {
        let client = client(StatusCode::PARTIAL_CONTENT, b"abc");
        let bytes = client
            .storage()
            .read_range("bkt", "logs/a b.txt", 10, 3)
            .await
            .expect("read succeeds");
        assert_eq!(&bytes[..], b"abc");

        let request = last_request(&client);
        assert_eq!(
            request.url,
            "http://fake/storage/v1/b/bkt/o/logs%2Fa%20b.txt?alt=media"
        );
        assert_eq!(request.headers["range"], "bytes=10-12");
        assert_eq!(request.headers["authorization"], "Bearer tok");
    }

    #[tokio::test]
    async fn range_past_the_end_reads_empty() {
        let client = client(StatusCode::RANGE_NOT_SATISFIABLE, b"");
        let bytes = client
            .storage()
            .read_range("bkt", "o", 100, 10)
            .await
            .expect("read succeeds");
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn ignored_range_is_sliced_locally() {
        let client = client(StatusCode::OK, b"0123456789");
        let bytes = client
            .storage()
            .read_range("bkt", "o", 4, 3)
            .await
            .expect("read succeeds");
        assert_eq!(&bytes[..], b"456");
    }

    #[tokio::test]
    async fn errors_carry_the_status() {
        let client = client(
            StatusCode::FORBIDDEN,
            br#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#,
        );
        let err = client
            .storage()
            .get_object("bkt", "o")
            .await
            .expect_err("403 is an error");
        assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    }
}
