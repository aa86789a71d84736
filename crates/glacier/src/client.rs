//! Glacier REST client.
//!
//! Blocking HTTP client using `reqwest`, one instance per region.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use coldvault_protocol::{
    ArchiveService, ByteRange, JobDescription, JobStatus, ServiceConnector, ServiceError, Tier,
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::Method;
use reqwest::blocking::{Client, Response};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::Credentials;
use crate::sigv4::{self, CanonicalRequest, Signer};

/// Value of the `x-amz-glacier-version` header.
pub const API_VERSION: &str = "2012-06-01";

const SERVICE: &str = "glacier";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Public endpoint of a region.
pub fn default_endpoint(region: &str) -> String {
    format!("https://glacier.{region}.amazonaws.com")
}

/// Glacier client bound to one region.
pub struct GlacierClient {
    http: Client,
    base_url: String,
    host: String,
    region: String,
    credentials: Credentials,
}

impl GlacierClient {
    /// Creates a client for `region`, talking to `endpoint` when given.
    pub fn new(
        region: &str,
        endpoint: Option<&str>,
        credentials: Credentials,
    ) -> Result<Self, ServiceError> {
        let base_url = endpoint
            .map(|e| e.trim_end_matches('/').to_string())
            .unwrap_or_else(|| default_endpoint(region));
        let url = reqwest::Url::parse(&base_url)
            .map_err(|e| ServiceError::Transport(format!("invalid endpoint {base_url}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ServiceError::Transport(format!(
                    "endpoint {base_url} has no host"
                )));
            }
        };

        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            host,
            region: region.to_string(),
            credentials,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Signs and sends one request. Non-2xx answers become errors.
    fn send(
        &self,
        method: Method,
        path: &str,
        extra_headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<Response, ServiceError> {
        let now = Utc::now();
        let payload_hash = sigv4::payload_hash(&body);

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-amz-date".to_string(), sigv4::amz_date(now));
        headers.insert("x-amz-glacier-version".to_string(), API_VERSION.to_string());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }
        for (name, value) in extra_headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        let canonical = CanonicalRequest {
            method: method.as_str(),
            path,
            query: "",
            headers: &headers,
            payload_hash: &payload_hash,
        };
        let authorization =
            Signer::new(&self.credentials, &self.region, SERVICE).authorization(&canonical, now);

        let mut request = self
            .http
            .request(method.clone(), format!("{}{path}", self.base_url));
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = request.header(AUTHORIZATION, authorization).body(body);

        debug!(%method, path, "glacier request");
        let response = request
            .send()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let status = response.status();
        debug!(status = status.as_u16(), path, "glacier response");

        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(error_from_response(status.as_u16(), &body))
    }
}

/// `/-/vaults/{vault}/{rest...}` with each segment encoded.
fn vault_path(vault: &str, rest: &[&str]) -> String {
    let mut path = format!("/-/vaults/{}", utf8_percent_encode(vault, PATH_SEGMENT));
    for segment in rest {
        path.push('/');
        path.extend(utf8_percent_encode(segment, PATH_SEGMENT));
    }
    path
}

fn required_header(response: &Response, name: &str) -> Result<String, ServiceError> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::InvalidResponse(format!("missing {name} header")))
}

/// Archive descriptions must be printable ASCII.
fn sanitize_description(description: &str) -> String {
    description
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Maps an unsuccessful response to a [`ServiceError`].
pub(crate) fn error_from_response(status: u16, body: &str) -> ServiceError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        format!("HTTP {status}")
    } else {
        parsed.message
    };

    if status == 404 || parsed.code == "ResourceNotFoundException" {
        return ServiceError::NotFound(message);
    }
    if status == 401 || status == 403 {
        return ServiceError::Unauthenticated(message);
    }
    if parsed.code == "InvalidParameterValueException"
        && message.to_ascii_lowercase().contains("checksum")
    {
        return ServiceError::ChecksumMismatch(message);
    }
    let code = if parsed.code.is_empty() {
        format!("HTTP {status}")
    } else {
        parsed.code
    };
    ServiceError::Rejected { code, message }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeJobOutput {
    status_code: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    archive_size_in_bytes: Option<u64>,
    #[serde(rename = "SHA256TreeHash", default)]
    sha256_tree_hash: Option<String>,
}

pub(crate) fn parse_job_description(
    job_id: &str,
    body: &[u8],
) -> Result<JobDescription, ServiceError> {
    let output: DescribeJobOutput =
        serde_json::from_slice(body).map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
    let status = match output.status_code.as_str() {
        "InProgress" => JobStatus::InProgress,
        "Succeeded" => JobStatus::Succeeded,
        "Failed" => {
            return Err(ServiceError::Rejected {
                code: "JobFailed".into(),
                message: output
                    .status_message
                    .unwrap_or_else(|| format!("job {job_id} failed")),
            });
        }
        other => {
            return Err(ServiceError::InvalidResponse(format!(
                "unknown job status {other}"
            )));
        }
    };
    Ok(JobDescription {
        job_id: job_id.to_string(),
        status,
        archive_size: output.archive_size_in_bytes.unwrap_or(0),
        tree_hash: output.sha256_tree_hash,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RetrievalRequest<'a> {
    #[serde(rename = "Type")]
    kind: &'static str,
    archive_id: &'a str,
    tier: &'static str,
}

impl ArchiveService for GlacierClient {
    fn open_multipart_upload(
        &self,
        vault: &str,
        part_size: u64,
        description: &str,
    ) -> Result<String, ServiceError> {
        let headers = [
            ("x-amz-part-size", part_size.to_string()),
            ("x-amz-archive-description", sanitize_description(description)),
        ];
        let response = self.send(
            Method::POST,
            &vault_path(vault, &["multipart-uploads"]),
            &headers,
            Vec::new(),
        )?;
        required_header(&response, "x-amz-multipart-upload-id")
    }

    fn upload_part(
        &self,
        upload_id: &str,
        vault: &str,
        range: ByteRange,
        checksum: &str,
        data: &[u8],
    ) -> Result<(), ServiceError> {
        let headers = [
            ("content-range", range.content_range()),
            ("x-amz-sha256-tree-hash", checksum.to_string()),
        ];
        self.send(
            Method::PUT,
            &vault_path(vault, &["multipart-uploads", upload_id]),
            &headers,
            data.to_vec(),
        )?;
        Ok(())
    }

    fn close_multipart_upload(
        &self,
        upload_id: &str,
        vault: &str,
        total_size: u64,
        checksum: &str,
    ) -> Result<String, ServiceError> {
        let headers = [
            ("x-amz-archive-size", total_size.to_string()),
            ("x-amz-sha256-tree-hash", checksum.to_string()),
        ];
        let response = self.send(
            Method::POST,
            &vault_path(vault, &["multipart-uploads", upload_id]),
            &headers,
            Vec::new(),
        )?;
        required_header(&response, "x-amz-archive-id")
    }

    fn abort_multipart_upload(&self, upload_id: &str, vault: &str) -> Result<(), ServiceError> {
        self.send(
            Method::DELETE,
            &vault_path(vault, &["multipart-uploads", upload_id]),
            &[],
            Vec::new(),
        )?;
        Ok(())
    }

    fn request_retrieval(
        &self,
        archive_id: &str,
        vault: &str,
        tier: Tier,
    ) -> Result<String, ServiceError> {
        let body = serde_json::to_vec(&RetrievalRequest {
            kind: "archive-retrieval",
            archive_id,
            tier: tier.as_str(),
        })
        .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        let headers = [("content-type", "application/json".to_string())];
        let response = self.send(Method::POST, &vault_path(vault, &["jobs"]), &headers, body)?;
        required_header(&response, "x-amz-job-id")
    }

    fn describe_job(&self, job_id: &str, vault: &str) -> Result<JobDescription, ServiceError> {
        let response = self.send(
            Method::GET,
            &vault_path(vault, &["jobs", job_id]),
            &[],
            Vec::new(),
        )?;
        let body = response
            .bytes()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        parse_job_description(job_id, &body)
    }

    fn fetch_job_output(
        &self,
        job_id: &str,
        vault: &str,
        range: ByteRange,
    ) -> Result<Vec<u8>, ServiceError> {
        let headers = [("range", range.range_header())];
        let response = self.send(
            Method::GET,
            &vault_path(vault, &["jobs", job_id, "output"]),
            &headers,
            Vec::new(),
        )?;
        let body = response
            .bytes()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(body.to_vec())
    }

    fn delete_archive(&self, archive_id: &str, vault: &str) -> Result<(), ServiceError> {
        self.send(
            Method::DELETE,
            &vault_path(vault, &["archives", archive_id]),
            &[],
            Vec::new(),
        )?;
        Ok(())
    }
}

/// Builds [`GlacierClient`]s for [`RegionClients`](coldvault_protocol::RegionClients).
#[derive(Debug, Clone, Default)]
pub struct GlacierConnector {
    endpoint: Option<String>,
    credentials: Option<Credentials>,
}

impl GlacierConnector {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self {
            endpoint: None,
            credentials,
        }
    }

    /// Sends every request to `endpoint` instead of the regional default.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl ServiceConnector for GlacierConnector {
    type Service = GlacierClient;

    fn connect(&self, region: &str) -> Result<GlacierClient, ServiceError> {
        let credentials = self
            .credentials
            .clone()
            .ok_or_else(|| ServiceError::Unauthenticated("no AWS credentials configured".into()))?;
        GlacierClient::new(region, self.endpoint.as_deref(), credentials)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    /// Serves one canned response and returns the raw request received.
    fn mock_server(status: &str, headers: &[(&str, &str)], body: &str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut response = format!("HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n", body.len());
        for (name, value) in headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str("\r\n");
        response.push_str(body);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                if let Some(end) = find(&raw, b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&raw[..end]).to_lowercase();
                    let length = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            tx.send(String::from_utf8_lossy(&raw).into_owned()).unwrap();
        });
        (format!("http://127.0.0.1:{port}"), rx)
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn client(endpoint: &str) -> GlacierClient {
        GlacierClient::new(
            "eu-west-1",
            Some(endpoint),
            Credentials::new("AKIDEXAMPLE", "secret"),
        )
        .unwrap()
    }

    #[test]
    fn describe_job_sends_signed_request() {
        let (url, rx) = mock_server(
            "200 OK",
            &[("Content-Type", "application/json")],
            r#"{"JobId":"job-1","StatusCode":"Succeeded","ArchiveSizeInBytes":42,"SHA256TreeHash":"abcd"}"#,
        );
        let desc = client(&url).describe_job("job-1", "photos").unwrap();
        assert_eq!(desc.status, JobStatus::Succeeded);
        assert_eq!(desc.archive_size, 42);
        assert_eq!(desc.tree_hash.as_deref(), Some("abcd"));

        let request = rx.recv().unwrap();
        assert!(request.starts_with("GET /-/vaults/photos/jobs/job-1 HTTP/1.1"));
        let lower = request.to_lowercase();
        assert!(lower.contains("x-amz-glacier-version: 2012-06-01"));
        assert!(lower.contains(
            "authorization: aws4-hmac-sha256 credential=akidexample/"
        ));
        assert!(lower.contains("/eu-west-1/glacier/aws4_request"));
    }

    #[test]
    fn upload_part_sends_range_and_tree_hash() {
        let (url, rx) = mock_server("204 No Content", &[], "");
        let range = ByteRange::new(0, 4).unwrap();
        client(&url)
            .upload_part("up-1", "photos", range, "beef", b"abcd")
            .unwrap();

        let request = rx.recv().unwrap();
        assert!(request.starts_with("PUT /-/vaults/photos/multipart-uploads/up-1 HTTP/1.1"));
        let lower = request.to_lowercase();
        assert!(lower.contains("content-range: bytes 0-3/*"));
        assert!(lower.contains("x-amz-sha256-tree-hash: beef"));
        assert!(request.ends_with("abcd"));
    }

    #[test]
    fn close_returns_archive_id_header() {
        let (url, _rx) = mock_server("201 Created", &[("x-amz-archive-id", "arch-9")], "");
        let id = client(&url)
            .close_multipart_upload("up-1", "photos", 4, "beef")
            .unwrap();
        assert_eq!(id, "arch-9");
    }

    #[test]
    fn missing_job_is_not_found() {
        let (url, _rx) = mock_server(
            "404 Not Found",
            &[],
            r#"{"code":"ResourceNotFoundException","message":"The job ID was not found","type":"Client"}"#,
        );
        let err = client(&url).describe_job("gone", "photos").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn error_mapping() {
        assert!(error_from_response(404, "").is_not_found());
        assert!(matches!(
            error_from_response(403, r#"{"code":"InvalidSignatureException","message":"bad"}"#),
            ServiceError::Unauthenticated(_)
        ));
        assert!(matches!(
            error_from_response(
                400,
                r#"{"code":"InvalidParameterValueException","message":"Checksum mismatch: expected x"}"#
            ),
            ServiceError::ChecksumMismatch(_)
        ));
        match error_from_response(500, "not json") {
            ServiceError::Rejected { code, message } => {
                assert_eq!(code, "HTTP 500");
                assert_eq!(message, "HTTP 500");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn job_description_statuses() {
        let pending = parse_job_description("j", br#"{"StatusCode":"InProgress"}"#).unwrap();
        assert_eq!(pending.status, JobStatus::InProgress);
        assert_eq!(pending.archive_size, 0);

        let failed = parse_job_description(
            "j",
            br#"{"StatusCode":"Failed","StatusMessage":"archive unavailable"}"#,
        )
        .unwrap_err();
        assert!(matches!(failed, ServiceError::Rejected { ref code, .. } if code == "JobFailed"));

        assert!(matches!(
            parse_job_description("j", br#"{"StatusCode":"Paused"}"#),
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn retrieval_request_body() {
        let body = serde_json::to_string(&RetrievalRequest {
            kind: "archive-retrieval",
            archive_id: "a1",
            tier: Tier::Expedited.as_str(),
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"Type":"archive-retrieval","ArchiveId":"a1","Tier":"Expedited"}"#
        );
    }

    #[test]
    fn paths_and_descriptions() {
        assert_eq!(vault_path("my vault", &["jobs", "j1"]), "/-/vaults/my%20vault/jobs/j1");
        assert_eq!(sanitize_description("café.tar"), "caf?.tar");
        assert_eq!(default_endpoint("us-east-1"), "https://glacier.us-east-1.amazonaws.com");
    }

    #[test]
    fn connector_requires_credentials() {
        let err = GlacierConnector::new(None).connect("us-east-1").err().unwrap();
        assert!(matches!(err, ServiceError::Unauthenticated(_)));

        let client = GlacierConnector::new(Some(Credentials::new("a", "b")))
            .with_endpoint("http://127.0.0.1:9000/")
            .connect("eu-central-1")
            .unwrap();
        assert_eq!(client.region(), "eu-central-1");
        assert_eq!(client.host, "127.0.0.1:9000");
    }
}
