//! Minimal HTTP/1.1 framing for the pairing endpoints.

use std::io::Write;

use hap_core::error::ParseError;

/// Content type of pairing requests and replies.
pub const PAIRING_TLV8: &str = "application/pairing+tlv8";

const MAX_HEADER_LEN: usize = 8 * 1024;
const MAX_BODY_LEN: usize = 64 * 1024;

/// Parsed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Header value, case-insensitive.
    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Try to parse one request from the front of `data`.
    ///
    /// Returns `None` until a complete request is buffered, otherwise the
    /// request and the number of bytes it used.
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>, ParseError> {
        let header_end = match data.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(end) => end,
            None if data.len() > MAX_HEADER_LEN => {
                return Err(ParseError::InvalidFormat("HTTP headers too long".to_string()))
            }
            None => return Ok(None),
        };

        let head = std::str::from_utf8(&data[..header_end])
            .map_err(|_| ParseError::InvalidFormat("invalid UTF-8 in headers".to_string()))?;
        let mut lines = head.split("\r\n");

        let request_line = lines
            .next()
            .ok_or(ParseError::MissingField("request line"))?;
        let mut parts = request_line.split(' ');
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) if !m.is_empty() && !p.is_empty() => (m, p, v),
            _ => {
                return Err(ParseError::InvalidFormat(format!(
                    "bad request line: {}",
                    request_line
                )))
            }
        };
        if !version.starts_with("HTTP/1.") {
            return Err(ParseError::InvalidValue(format!("unsupported version {}", version)));
        }

        let mut headers = Vec::new();
        for line in lines {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| ParseError::InvalidFormat(format!("bad header line: {}", line)))?;
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }

        let mut request = Self {
            method: method.to_string(),
            path: path.to_string(),
            headers,
            body: Vec::new(),
        };

        let content_length = match request.header_value("Content-Length") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidValue(format!("Content-Length: {}", v)))?,
            None => 0,
        };
        if content_length > MAX_BODY_LEN {
            return Err(ParseError::InvalidValue(format!(
                "body of {} bytes is too large",
                content_length
            )));
        }

        let body_start = header_end + 4;
        let total = body_start + content_length;
        if data.len() < total {
            return Ok(None);
        }
        request.body = data[body_start..total].to_vec();
        Ok(Some((request, total)))
    }

    /// Serialize to wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let _ = write!(out, "{} {} HTTP/1.1\r\n", self.method, self.path);
        for (key, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", key, value);
        }
        if self.header_value("Content-Length").is_none() {
            let _ = write!(out, "Content-Length: {}\r\n", self.body.len());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// 200 with a TLV8 body.
    pub fn tlv8(body: Vec<u8>) -> Self {
        Self::new(200).content_type(PAIRING_TLV8).body(body)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// 470: the endpoint needs an encrypted session.
    pub fn authorization_required() -> Self {
        Self::new(470)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn content_type(self, value: &str) -> Self {
        self.header("Content-Type", value)
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire format. `Content-Length` is always written.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let _ = write!(out, "HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (key, value) in &self.headers {
            if key.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            let _ = write!(out, "{}: {}\r\n", key, value);
        }
        let _ = write!(out, "Content-Length: {}\r\n\r\n", self.body.len());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a complete response. Used by controllers and tests.
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>, ParseError> {
        let header_end = match data.windows(4).position(|w| w == b"\r\n\r\n") {
            Some(end) => end,
            None => return Ok(None),
        };
        let head = std::str::from_utf8(&data[..header_end])
            .map_err(|_| ParseError::InvalidFormat("invalid UTF-8 in headers".to_string()))?;
        let mut lines = head.split("\r\n");

        let status_line = lines.next().ok_or(ParseError::MissingField("status line"))?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next();
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| ParseError::InvalidFormat(format!("bad status line: {}", status_line)))?;
        let reason = parts.next().unwrap_or_default().to_string();

        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        let mut response = Self {
            status,
            reason,
            headers,
            body: Vec::new(),
        };
        let content_length = response
            .header_value("Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let total = header_end + 4 + content_length;
        if data.len() < total {
            return Ok(None);
        }
        response.body = data[header_end + 4..total].to_vec();
        Ok(Some((response, total)))
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        470 => "Connection Authorization Required",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
