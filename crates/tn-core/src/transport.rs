//! Transport adapters.
//!
//! [`HttpTransport`] speaks the backend's existing wire format: the record
//! is rendered as a JSON-like key/value fragment, percent-encoded, and
//! appended to the endpoint path of a `GET` request.
//!
//! # Known weak point
//!
//! The backend does not return a structured acknowledgment. A reply counts
//! as acknowledged when its status line or body contains `200` or `OK`,
//! which is kept for wire compatibility. A body such as `"NOT OK"` or one
//! that merely echoes a value of `200` is accepted as success. The
//! detection lives in [`is_acknowledged`] so it can be replaced in one
//! place once the backend grows a real acknowledgment.

use std::io;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tn_config::TransportConfig;
use tracing::{debug, warn};

use crate::ports::{Ack, Outcome, Payload, Transport, TransportFailure};

/// Characters left unescaped in the path fragment (RFC 3986 unreserved).
const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Longest reply excerpt kept in a failure.
const EXCERPT_LEN: usize = 64;

/// Reply key carrying a new sampling period in milliseconds.
const PERIOD_KEY: &str = "period";
/// Reply key carrying a new accumulation count.
const ACCUMULATION_KEY: &str = "accumulation";

/// Render the payload as the `{"key":"value",...}` fragment the backend
/// parses. Values are already delimiter-free record fields.
pub fn render_fragment(payload: &Payload, period_ms: u32) -> String {
    let mut pairs: Vec<(String, String)> = vec![
        ("device".into(), payload.device_id.as_str().to_string()),
        ("id".into(), payload.record_id.to_string()),
        ("ts".into(), payload.timestamp.to_string()),
        (PERIOD_KEY.into(), period_ms.to_string()),
    ];
    pairs.extend(payload.fields.iter().cloned());

    let body: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("\"{}\":\"{}\"", escape_quotes(k), escape_quotes(v)))
        .collect();
    format!("{{{}}}", body.join(","))
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Full request URL for one submission.
pub fn request_url(endpoint: &str, payload: &Payload, period_ms: u32) -> String {
    let fragment = render_fragment(payload, period_ms);
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        utf8_percent_encode(&fragment, FRAGMENT)
    )
}

/// Success-marker heuristic. See the module docs.
pub fn is_acknowledged(reply: &str) -> bool {
    reply.contains("200") || reply.contains("OK")
}

/// Pull retuned parameters out of a reply.
///
/// Accepts `period=60000`, `"period":60000`, `"period": "60000"` and the
/// like. Anything that does not parse as an unsigned number is ignored.
pub fn parse_reply_params(reply: &str) -> Ack {
    Ack {
        new_period: find_param(reply, PERIOD_KEY),
        new_accumulation: find_param(reply, ACCUMULATION_KEY),
    }
}

fn find_param(reply: &str, key: &str) -> Option<u32> {
    reply.match_indices(key).find_map(|(pos, _)| {
        let rest = &reply[pos + key.len()..];
        let rest = rest.trim_start_matches(|c: char| matches!(c, '"' | '\'' | ' ' | ':' | '='));
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            None
        } else {
            digits.parse::<u32>().ok()
        }
    })
}

/// Map a reply to an outcome.
pub fn interpret_reply(status_line: &str, body: &str) -> Outcome {
    let reply = format!("{}\n{}", status_line, body);
    if is_acknowledged(&reply) {
        Outcome::Ack(parse_reply_params(body))
    } else {
        Outcome::Nack(TransportFailure::NoSuccessMarker {
            excerpt: excerpt(&reply),
        })
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_LEN).collect()
}

/// `GET` uplink with a hard deadline.
#[derive(Debug)]
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
    timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        HttpTransport {
            agent,
            endpoint: config.endpoint.clone(),
            timeout_ms: config.timeout_ms,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn submit(&mut self, payload: &Payload, period_ms: u32) -> Outcome {
        let url = request_url(&self.endpoint, payload, period_ms);
        debug!(record_id = %payload.record_id, url_len = url.len(), "submitting record");

        match self.agent.get(&url).call() {
            Ok(response) => {
                let status_line = format!("{} {}", response.status(), response.status_text());
                match response.into_string() {
                    Ok(body) => interpret_reply(&status_line, &body),
                    Err(e) => Outcome::Nack(self.io_failure(e)),
                }
            }
            Err(ureq::Error::Status(code, response)) => {
                let message = response.into_string().map(|b| excerpt(&b)).unwrap_or_default();
                warn!(status = code, "backend rejected submission");
                Outcome::Nack(TransportFailure::Http {
                    status: Some(code),
                    message,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                if is_timeout(&transport) {
                    Outcome::Nack(TransportFailure::Timeout {
                        after_ms: self.timeout_ms,
                    })
                } else {
                    Outcome::Nack(TransportFailure::Http {
                        status: None,
                        message: transport.to_string(),
                    })
                }
            }
        }
    }
}

impl HttpTransport {
    fn io_failure(&self, e: io::Error) -> TransportFailure {
        if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
            TransportFailure::Timeout {
                after_ms: self.timeout_ms,
            }
        } else {
            TransportFailure::Http {
                status: None,
                message: e.to_string(),
            }
        }
    }
}

fn is_timeout(err: &ureq::Transport) -> bool {
    std::error::Error::source(err)
        .and_then(|s| s.downcast_ref::<io::Error>())
        .map(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
        .unwrap_or(false)
}

/// Uplink that is never up. Records stay pending.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

impl Transport for OfflineTransport {
    fn submit(&mut self, _payload: &Payload, _period_ms: u32) -> Outcome {
        Outcome::Nack(TransportFailure::Offline)
    }
}
