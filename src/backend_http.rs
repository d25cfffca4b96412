use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::warn;
use reqwest::header::{ACCEPT_ENCODING, HeaderValue, RANGE};
use reqwest::{Client, IntoUrl, Method, Request, StatusCode, Url};
use tokio::sync::OnceCell;

use crate::byte_range::ByteRange;
use crate::error::{Result, TrError};
use crate::range_reader::RangeReader;

/// Configuration of an [`HttpReader`] and its connection pool.
#[derive(Debug, Clone)]
pub struct HttpReaderConfig {
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
    /// Deadline for a whole request.
    pub read_timeout: Duration,
    /// Let the server compress response bodies. Disabled by default:
    /// ranged reads need byte-exact lengths.
    pub compression_enabled: bool,
    /// Skip TLS certificate verification.
    pub trust_all_certificates: bool,
    /// Idle connections kept per host.
    pub max_connections: usize,
    /// Attempts per read, including the first; transient failures are
    /// retried with doubling backoff.
    pub max_attempts: u32,
}

impl Default for HttpReaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            compression_enabled: false,
            trust_all_certificates: false,
            max_connections: 16,
            max_attempts: 3,
        }
    }
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP(S) backend issuing `Range: bytes=...` requests through a pooled
/// [`reqwest::Client`].
///
/// The source size is learned from the `Content-Range` header of the
/// first ranged response, or from a `HEAD` request when
/// [`size`](RangeReader::size) is called first.
#[derive(Debug)]
pub struct HttpReader {
    client: Client,
    url: Url,
    source_id: String,
    compression_enabled: bool,
    max_attempts: u32,
    size: OnceCell<u64>,
}

impl HttpReader {
    /// Creates a reader over `url` using an existing client.
    pub fn new<U: IntoUrl>(client: Client, url: U) -> Result<Self> {
        Self::with_client(client, url, &HttpReaderConfig::default())
    }

    /// Creates a reader over `url`, building a client from `config`.
    pub fn with_config<U: IntoUrl>(config: &HttpReaderConfig, url: U) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .tcp_keepalive(Duration::from_secs(600))
            .danger_accept_invalid_certs(config.trust_all_certificates)
            .build()
            .map_err(map_reqwest_error)?;
        Self::with_client(client, url, config)
    }

    fn with_client<U: IntoUrl>(client: Client, url: U, config: &HttpReaderConfig) -> Result<Self> {
        let url = url.into_url().map_err(map_reqwest_error)?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TrError::invalid_argument(format!(
                    "unsupported scheme {other:?} for the HTTP backend"
                )));
            }
        }
        Ok(Self {
            source_id: url.to_string(),
            client,
            url,
            compression_enabled: config.compression_enabled,
            max_attempts: config.max_attempts.max(1),
            size: OnceCell::new(),
        })
    }

    /// One ranged request; `Ok` carries the body and the total size
    /// parsed from `Content-Range`.
    async fn fetch_range(&self, range: ByteRange) -> Result<(Bytes, Option<u64>), FetchError> {
        let range_header = HeaderValue::try_from(format!(
            "bytes={}-{}",
            range.offset,
            range.end() - 1
        ))
        .map_err(|_| {
            FetchError::fatal(TrError::invalid_argument("range is not a valid header value"))
        })?;

        let mut request = Request::new(Method::GET, self.url.clone());
        request.headers_mut().insert(RANGE, range_header);
        if !self.compression_enabled {
            request
                .headers_mut()
                .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| FetchError::transport(map_reqwest_error(err)))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            // "bytes */<total>" tells us where the source actually ends.
            let size = response
                .headers()
                .get(reqwest::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_unsatisfied_total)
                .unwrap_or(0);
            return Err(FetchError::fatal(TrError::OutOfRange {
                offset: range.offset,
                size,
            }));
        }
        if status.is_server_error() {
            return Err(FetchError::transient(TrError::Io(std::io::Error::other(
                format!("server responded with {status}"),
            ))));
        }
        if !status.is_success() {
            return Err(FetchError::fatal(TrError::Io(std::io::Error::other(
                format!("server responded with {status}"),
            ))));
        }
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::fatal(TrError::Unsupported(
                "server ignored the Range header; ranged reads are required",
            )));
        }

        let total = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);

        let body = response
            .bytes()
            .await
            .map_err(|err| FetchError::transport(map_reqwest_error(err)))?;
        if body.len() > range.length as usize {
            return Err(FetchError::fatal(TrError::Io(std::io::Error::other(
                format!(
                    "server returned {} bytes for a {}-byte range",
                    body.len(),
                    range.length
                ),
            ))));
        }
        Ok((body, total))
    }
}

/// A failed fetch attempt, carrying whether a retry can help.
struct FetchError {
    error: TrError,
    transient: bool,
}

impl FetchError {
    fn fatal(error: TrError) -> Self {
        Self {
            error,
            transient: false,
        }
    }

    fn transient(error: TrError) -> Self {
        Self {
            error,
            transient: true,
        }
    }

    /// Transport-level failures (timeouts, resets) are worth retrying;
    /// anything else from the client is not.
    fn transport(error: TrError) -> Self {
        let transient = matches!(error, TrError::Timeout(_) | TrError::Io(_));
        Self { error, transient }
    }
}

#[async_trait]
impl RangeReader for HttpReader {
    async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        if range.length == 0 {
            return Err(TrError::invalid_argument("read length must be positive"));
        }
        if let Some(&size) = self.size.get() {
            if range.offset >= size {
                return Err(TrError::OutOfRange {
                    offset: range.offset,
                    size,
                });
            }
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.fetch_range(range).await {
                Ok((body, total)) => {
                    if let Some(total) = total {
                        let _ = self.size.set(total);
                        // A short body is only legal when the range
                        // overhangs the end of the source.
                        if body.len() < range.length as usize
                            && range.offset + body.len() as u64 != total
                        {
                            return Err(TrError::Io(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                format!(
                                    "server returned {} of {} bytes mid-source",
                                    body.len(),
                                    range.length
                                ),
                            )));
                        }
                    }
                    return Ok(body);
                }
                Err(err) if attempt < self.max_attempts && err.transient => {
                    warn!(
                        "transient failure reading {range} from {} (attempt {attempt}): {}",
                        self.source_id, err.error
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err.error),
            }
        }
    }

    async fn size(&self) -> Result<u64> {
        self.size
            .get_or_try_init(|| async {
                let response = self
                    .client
                    .head(self.url.clone())
                    .send()
                    .await
                    .map_err(map_reqwest_error)?
                    .error_for_status()
                    .map_err(map_reqwest_error)?;
                response.content_length().ok_or(TrError::SizeUnknown)
            })
            .await
            .copied()
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

/// Maps reqwest failures onto the crate taxonomy at the backend boundary.
fn map_reqwest_error(err: reqwest::Error) -> TrError {
    if err.is_timeout() {
        if err.is_connect() {
            TrError::Timeout("connect")
        } else {
            TrError::Timeout("read")
        }
    } else {
        TrError::Io(std::io::Error::other(err))
    }
}

/// Parses the total from `bytes <start>-<end>/<total>`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.trim().rsplit_once('/')?;
    total.parse().ok()
}

/// Parses the total from the 416 form `bytes */<total>`.
fn parse_unsatisfied_total(header: &str) -> Option<u64> {
    let rest = header.trim().strip_prefix("bytes ")?;
    let (range, total) = rest.rsplit_once('/')?;
    if range.trim() == "*" { total.parse().ok() } else { None }
}
