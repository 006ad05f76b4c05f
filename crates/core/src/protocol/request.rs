use crate::error::{Error, ParseErrorKind};

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// ```
///
/// Method tokens are matched case-sensitively; header lookup is
/// case-insensitive per RFC 2326 §4.2. Bodies are not parsed — none of the
/// supported methods carry one in client requests.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:5801/lifecam`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
}

impl RtspRequest {
    /// Parse an RTSP request from its text representation.
    ///
    /// Expects a complete request: request line, headers, and trailing blank
    /// line. Returns [`Error::Parse`] on malformed input.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(Error::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(Error::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(Error::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    ///
    /// Echoed verbatim in every response; an absent CSeq echoes as the
    /// empty string.
    pub fn cseq(&self) -> &str {
        self.get_header("CSeq").unwrap_or("")
    }

    /// Extract the stream name from the request-URI.
    ///
    /// The stream name is the last non-empty path segment, trimmed of any
    /// trailing `/`:
    ///
    /// - `rtsp://host:5801/lifecam`  → `lifecam`
    /// - `rtsp://host:5801/lifecam/` → `lifecam`
    /// - `rtsp://host:5801/` or `*`  → none
    pub fn stream_name(&self) -> Option<&str> {
        let after_scheme = self
            .uri
            .strip_prefix("rtsp://")
            .or_else(|| self.uri.strip_prefix("rtsps://"))
            .unwrap_or(&self.uri);

        let path = match after_scheme.find('/') {
            Some(slash) => &after_scheme[slash..],
            None => return None,
        };

        path.rsplit('/').find(|segment| !segment.is_empty())
    }
}
