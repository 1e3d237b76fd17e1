// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository HTTP transport.

All repository fetches go through [HttpClient]: responses are cached on
disk keyed by URL, and every network read observes the build's
cancellation token.
*/

use {
    crate::{
        cache::DiskCache,
        error::{Error, Result},
    },
    chrono::{DateTime, TimeZone, Utc},
    futures::StreamExt,
    std::sync::Arc,
    tokio_util::sync::CancellationToken,
    tracing::debug,
    url::Url,
};

/// A fetched HTTP response body.
pub struct HttpResponse {
    pub body: Vec<u8>,
    /// Parsed `Last-Modified` header; the Unix epoch when missing or
    /// malformed.
    pub last_modified: DateTime<Utc>,
}

/// The zero instant used when a timestamp is unknown.
pub fn zero_instant() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Parse an HTTP date header value, yielding the zero instant on failure.
fn parse_http_date(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| mailparse::dateparse(v).ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(zero_instant)
}

/// HTTP client for repository access.
///
/// Full response bodies are read before use so the disk cache always
/// observes complete responses.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    cache: Option<Arc<DiskCache>>,
    cancel: CancellationToken,
}

impl HttpClient {
    /// Construct an instance with an optional response cache.
    pub fn new(cache: Option<Arc<DiskCache>>, cancel: CancellationToken) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache,
            cancel,
        }
    }

    /// The cancellation token observed by this client.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// GET a URL, returning the full body.
    ///
    /// Non-2xx statuses are errors. The body is streamed chunk-by-chunk
    /// with cancellation observed between chunks.
    pub async fn get(&self, url: &Url) -> Result<HttpResponse> {
        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(url.as_str()).and_then(decode_cache_entry) {
                return Ok(entry);
            }
        }

        debug!(url = %url, "fetching");

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.get(url.clone()).send() => response?,
        };

        let response = response.error_for_status()?;

        let last_modified = parse_http_date(
            response
                .headers()
                .get(reqwest::header::LAST_MODIFIED)
                .and_then(|v| v.to_str().ok()),
        );

        let mut body = match response.content_length() {
            Some(len) => Vec::with_capacity(len as usize),
            None => Vec::new(),
        };

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(chunk) => body.extend_from_slice(&chunk?),
                None => break,
            }
        }

        if let Some(cache) = &self.cache {
            cache.set(url.as_str(), &encode_cache_entry(last_modified, &body));
        }

        Ok(HttpResponse {
            body,
            last_modified,
        })
    }
}

/// Cache entries prefix the body with the Last-Modified timestamp so hits
/// preserve it.
fn encode_cache_entry(last_modified: DateTime<Utc>, body: &[u8]) -> Vec<u8> {
    let mut entry = Vec::with_capacity(8 + body.len());
    entry.extend_from_slice(&last_modified.timestamp().to_be_bytes());
    entry.extend_from_slice(body);
    entry
}

fn decode_cache_entry(entry: Vec<u8>) -> Option<HttpResponse> {
    if entry.len() < 8 {
        return None;
    }

    let ts = i64::from_be_bytes(entry[0..8].try_into().expect("slice length checked"));
    let last_modified = Utc.timestamp_opt(ts, 0).single()?;

    Some(HttpResponse {
        body: entry[8..].to_vec(),
        last_modified,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_entry_round_trip() {
        let when = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let entry = encode_cache_entry(when, b"Package: bash\n");

        let decoded = decode_cache_entry(entry).unwrap();
        assert_eq!(decoded.last_modified, when);
        assert_eq!(decoded.body, b"Package: bash\n");
    }

    #[test]
    fn short_cache_entry_is_a_miss() {
        assert!(decode_cache_entry(vec![1, 2, 3]).is_none());
    }

    #[test]
    fn http_date_parsing() {
        let parsed = parse_http_date(Some("Sat, 10 Feb 2024 08:23:12 GMT"));
        assert!(parsed > zero_instant());

        assert_eq!(parse_http_date(Some("not a date")), zero_instant());
        assert_eq!(parse_http_date(None), zero_instant());
    }
}
