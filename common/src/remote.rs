//! Interval fetch and sample upload.

use log::{info, warn};

use crate::{
    config::EndpointConfig,
    error::{ConfigError, NetworkError, TransportError},
    types::{IntervalConfig, MeasurementSample},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking HTTP client below the sync contract.
pub trait HttpTransport {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError>;

    fn post_form(&mut self, url: &str, body: &str) -> Result<HttpResponse, TransportError>;

    /// Drops any open connection. Called once at the end of every session.
    fn release(&mut self);
}

pub struct RemoteSyncClient<T> {
    transport: T,
    endpoints: EndpointConfig,
}

impl<T: HttpTransport> RemoteSyncClient<T> {
    pub fn new(transport: T, endpoints: EndpointConfig) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &EndpointConfig {
        &self.endpoints
    }

    /// Opens a session; the transport is released when it is dropped.
    pub fn session(&mut self) -> SyncSession<'_, T> {
        SyncSession { client: self }
    }

    pub fn fetch_interval(&mut self) -> Result<u32, NetworkError> {
        self.session().fetch_interval()
    }

    pub fn post_sample(&mut self, sample: &MeasurementSample) -> bool {
        self.session().post_sample(sample)
    }
}

pub struct SyncSession<'a, T: HttpTransport> {
    client: &'a mut RemoteSyncClient<T>,
}

impl<T: HttpTransport> SyncSession<'_, T> {
    pub fn fetch_interval(&mut self) -> Result<u32, NetworkError> {
        let url = self.client.endpoints.interval_url.as_str();
        let response = self.client.transport.get(url)?;

        if !response.is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        let body = String::from_utf8_lossy(&response.body);
        let minutes = parse_interval(&body)?;
        info!("remote interval is {minutes} min");
        Ok(minutes)
    }

    pub fn try_post_sample(&mut self, sample: &MeasurementSample) -> Result<(), NetworkError> {
        let endpoints = &self.client.endpoints;
        let body = encode_sample(sample, endpoints);
        let response = self.client.transport.post_form(&endpoints.data_url, &body)?;

        if !response.is_success() {
            return Err(NetworkError::Status {
                url: endpoints.data_url.clone(),
                status: response.status,
            });
        }

        info!("posted sample `{body}`");
        Ok(())
    }

    pub fn post_sample(&mut self, sample: &MeasurementSample) -> bool {
        match self.try_post_sample(sample) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to post sample: {err}");
                false
            }
        }
    }
}

impl<T: HttpTransport> Drop for SyncSession<'_, T> {
    fn drop(&mut self) {
        self.client.transport.release();
    }
}

/// Largest accepted response body. The interval file is a few digits.
pub const MAX_RESPONSE_BODY: usize = 1024;

/// Drains a response body through `read` until it reports end of stream.
/// A body over [`MAX_RESPONSE_BODY`] is an error, never truncated.
pub fn read_body<E: core::fmt::Debug>(
    url: &str,
    mut read: impl FnMut(&mut [u8]) -> Result<usize, E>,
) -> Result<Vec<u8>, TransportError> {
    let mut body = Vec::new();
    let mut chunk = [0_u8; 128];

    loop {
        let len = read(&mut chunk).map_err(|err| TransportError::Body {
            url: url.to_string(),
            reason: format!("{err:?}"),
        })?;
        if len == 0 {
            return Ok(body);
        }
        if body.len() + len > MAX_RESPONSE_BODY {
            return Err(TransportError::BodyTooLarge {
                url: url.to_string(),
                limit: MAX_RESPONSE_BODY,
            });
        }
        body.extend_from_slice(&chunk[..len]);
    }
}

pub fn parse_interval(body: &str) -> Result<u32, ConfigError> {
    let trimmed = body.trim();
    let minutes: i64 = trimmed
        .parse()
        .map_err(|_| ConfigError::NotANumber(trimmed.to_string()))?;

    if minutes <= 0 {
        return Err(ConfigError::NonPositive(minutes));
    }
    u32::try_from(minutes).map_err(|_| ConfigError::NotANumber(trimmed.to_string()))
}

/// Temperature with one decimal, humidity as a whole percent, joined by the
/// configured field prefixes.
pub fn encode_sample(sample: &MeasurementSample, endpoints: &EndpointConfig) -> String {
    format!(
        "{}{:.1}{}{}",
        endpoints.temperature_field,
        sample.temperature_c,
        endpoints.humidity_field,
        sample.humidity_pct
    )
}

/// A failed fetch falls back to the default interval instead of failing.
pub fn resolve_interval(fetched: &Result<u32, NetworkError>, default_min: u32) -> IntervalConfig {
    match fetched {
        Ok(minutes) => IntervalConfig::remote(*minutes),
        Err(err) => {
            warn!("using default interval of {default_min} min: {err}");
            IntervalConfig::fallback(default_min)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::IntervalSource;

    #[derive(Default)]
    struct FakeTransport {
        gets: VecDeque<Result<HttpResponse, TransportError>>,
        post_status: u16,
        posted: Vec<(String, String)>,
        releases: u32,
    }

    impl FakeTransport {
        fn serving(body: &str) -> Self {
            Self {
                gets: VecDeque::from([Ok(HttpResponse {
                    status: 200,
                    body: body.as_bytes().to_vec(),
                })]),
                post_status: 200,
                ..Self::default()
            }
        }
    }

    impl HttpTransport for FakeTransport {
        fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
            self.gets.pop_front().unwrap_or_else(|| {
                Err(TransportError::Request {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                })
            })
        }

        fn post_form(&mut self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
            self.posted.push((url.to_string(), body.to_string()));
            Ok(HttpResponse {
                status: self.post_status,
                body: Vec::new(),
            })
        }

        fn release(&mut self) {
            self.releases += 1;
        }
    }

    fn sample() -> MeasurementSample {
        MeasurementSample::from_raw(21.33, 54.6)
    }

    #[test]
    fn fetches_and_trims_interval() {
        let mut client = RemoteSyncClient::new(FakeTransport::serving("15\n"), EndpointConfig::default());

        assert_eq!(client.fetch_interval(), Ok(15));
        assert_eq!(client.transport.releases, 1);
    }

    #[test]
    fn unparsable_interval_resolves_to_default() {
        let mut client = RemoteSyncClient::new(FakeTransport::serving("abc"), EndpointConfig::default());

        let fetched = client.fetch_interval();
        assert_eq!(
            fetched,
            Err(NetworkError::InvalidInterval(ConfigError::NotANumber(
                "abc".to_string()
            )))
        );

        let interval = resolve_interval(&fetched, 10);
        assert_eq!(interval, IntervalConfig::fallback(10));
        assert_eq!(interval.source, IntervalSource::Default);
    }

    #[test]
    fn error_status_is_a_network_error() {
        let mut transport = FakeTransport::serving("15");
        transport.gets[0] = Ok(HttpResponse {
            status: 404,
            body: b"15".to_vec(),
        });
        let mut client = RemoteSyncClient::new(transport, EndpointConfig::default());

        assert!(matches!(
            client.fetch_interval(),
            Err(NetworkError::Status { status: 404, .. })
        ));
        assert_eq!(client.transport.releases, 1);
    }

    #[test]
    fn transport_failure_still_releases() {
        let mut client = RemoteSyncClient::new(FakeTransport::default(), EndpointConfig::default());

        assert!(matches!(
            client.fetch_interval(),
            Err(NetworkError::Transport(_))
        ));
        assert_eq!(client.transport.releases, 1);
    }

    const PADDED_GARBAGE: &str =
        "15                                                                      not-a-number";

    #[test]
    fn numeric_prefix_with_trailing_garbage_is_not_an_interval() {
        let mut source = PADDED_GARBAGE.as_bytes();
        let body = read_body("http://node/interval", |buf| std::io::Read::read(&mut source, buf))
            .unwrap();
        assert_eq!(body.len(), PADDED_GARBAGE.len());

        let mut client =
            RemoteSyncClient::new(FakeTransport::serving(PADDED_GARBAGE), EndpointConfig::default());
        let fetched = client.fetch_interval();
        assert!(matches!(
            fetched,
            Err(NetworkError::InvalidInterval(ConfigError::NotANumber(_)))
        ));
        assert_eq!(resolve_interval(&fetched, 10), IntervalConfig::fallback(10));
    }

    #[test]
    fn oversized_body_is_rejected_not_truncated() {
        let oversized = vec![b'1'; MAX_RESPONSE_BODY + 1];
        let mut source = oversized.as_slice();

        assert_eq!(
            read_body("http://node/interval", |buf| std::io::Read::read(&mut source, buf)),
            Err(TransportError::BodyTooLarge {
                url: "http://node/interval".to_string(),
                limit: MAX_RESPONSE_BODY,
            })
        );

        let exact = vec![b'1'; MAX_RESPONSE_BODY];
        let mut source = exact.as_slice();
        let body = read_body("http://node/interval", |buf| std::io::Read::read(&mut source, buf));
        assert_eq!(body.map(|body| body.len()), Ok(MAX_RESPONSE_BODY));
    }

    #[test]
    fn body_read_failure_is_a_transport_error() {
        let result = read_body("http://node/interval", |_buf: &mut [u8]| Err("connection reset"));
        assert!(matches!(result, Err(TransportError::Body { .. })));
    }

    #[test]
    fn interval_must_be_positive() {
        assert_eq!(parse_interval("0"), Err(ConfigError::NonPositive(0)));
        assert_eq!(parse_interval("-5"), Err(ConfigError::NonPositive(-5)));
        assert_eq!(parse_interval(" 60 "), Ok(60));
        assert!(parse_interval("").is_err());
        assert!(parse_interval("99999999999").is_err());
    }

    #[test]
    fn posts_one_decimal_and_whole_percent() {
        let mut client = RemoteSyncClient::new(FakeTransport::serving("15"), EndpointConfig::default());

        assert!(client.post_sample(&sample()));

        let (url, body) = &client.transport.posted[0];
        assert_eq!(url, "https://your.website.address/collect.php");
        assert_eq!(body, "Temperature=21.3&Humidity=55");
        assert_eq!(client.transport.releases, 1);
    }

    #[test]
    fn custom_field_prefixes_are_used() {
        let endpoints = EndpointConfig {
            temperature_field: "t=".to_string(),
            humidity_field: ";h=".to_string(),
            ..EndpointConfig::default()
        };
        let sample = MeasurementSample::from_raw(-4.06, 80.2);

        assert_eq!(encode_sample(&sample, &endpoints), "t=-4.1;h=80");
    }

    #[test]
    fn rejected_post_reports_failure() {
        let mut transport = FakeTransport::serving("15");
        transport.post_status = 500;
        let mut client = RemoteSyncClient::new(transport, EndpointConfig::default());

        assert!(!client.post_sample(&sample()));
        assert_eq!(client.transport.releases, 1);
    }

    #[test]
    fn session_releases_once_for_fetch_and_post() {
        let mut client = RemoteSyncClient::new(FakeTransport::serving("15"), EndpointConfig::default());

        {
            let mut session = client.session();
            assert_eq!(session.fetch_interval(), Ok(15));
            assert!(session.post_sample(&sample()));
        }

        assert_eq!(client.transport.releases, 1);
    }
}
