// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log store client speaking the CloudWatch Logs JSON 1.1 protocol.
//!
//! Every operation is a `POST /` with the operation named in the
//! `X-Amz-Target` header. Requests are SigV4-signed when AWS credentials are
//! present in the environment and sent unsigned otherwise, which suits local
//! endpoints and signing proxies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::logs::event::LogEvent;
use crate::store::sigv4::{self, Credentials, SignableRequest};
use crate::store::{LogStoreClient, StoreError, StreamDescription};

const SERVICE: &str = "logs";
const TARGET_PREFIX: &str = "Logs_20140328";
const CONTENT_TYPE_JSON_1_1: &str = "application/x-amz-json-1.1";

#[derive(Debug, Clone)]
pub struct HttpLogStoreClient {
    client: reqwest::Client,
    endpoint: String,
    host: String,
    region: String,
    credentials: Option<Credentials>,
}

impl HttpLogStoreClient {
    /// Builds a client for the configured endpoint, picking up credentials
    /// from the environment.
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let endpoint = config.endpoint();
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| StoreError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(StoreError::InvalidEndpoint(endpoint)),
        };

        Ok(Self {
            client: build_client(config.proxy_https.as_deref(), config.request_timeout)?,
            endpoint,
            host,
            region: config.region.clone(),
            credentials: Credentials::from_env(),
        })
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    async fn call<B, R>(&self, operation: &str, body: &B) -> Result<R, StoreError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let target = format!("{TARGET_PREFIX}.{operation}");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON_1_1));
        headers.insert("x-amz-target", header_value(&target)?);

        if let Some(credentials) = &self.credentials {
            let request = SignableRequest {
                method: "POST",
                path: "/",
                query: "",
                headers: &[
                    ("content-type", CONTENT_TYPE_JSON_1_1),
                    ("host", self.host.as_str()),
                    ("x-amz-target", target.as_str()),
                ],
                payload: &payload,
            };
            let signed = sigv4::sign(
                credentials,
                &self.region,
                SERVICE,
                chrono::Utc::now(),
                &request,
            )?;
            for (name, value) in signed {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| StoreError::Signing(e.to_string()))?;
                headers.insert(name, header_value(&value)?);
            }
        }

        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .headers(headers)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if status.is_success() {
            let body: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
            return Ok(serde_json::from_slice(body)?);
        }

        Err(error_from_response(status.as_u16(), &bytes))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, StoreError> {
    HeaderValue::from_str(value).map_err(|e| StoreError::Signing(e.to_string()))
}

fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, StoreError> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
    #[serde(rename = "expectedSequenceToken", default)]
    expected_sequence_token: Option<String>,
}

fn error_from_response(status: u16, body: &[u8]) -> StoreError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_else(|_| ErrorBody {
        message: String::from_utf8_lossy(body).into_owned(),
        ..ErrorBody::default()
    });
    // "__type" may be namespaced: "com.amazonaws.logs#InvalidSequenceTokenException".
    let code = parsed
        .error_type
        .rsplit('#')
        .next()
        .unwrap_or_default()
        .to_string();

    match code.as_str() {
        "InvalidSequenceTokenException" => StoreError::InvalidToken {
            expected_token: parsed.expected_sequence_token,
        },
        "DataAlreadyAcceptedException" => StoreError::DataAlreadyAccepted {
            expected_token: parsed.expected_sequence_token,
        },
        "ResourceNotFoundException" => StoreError::NotFound(parsed.message),
        "ResourceAlreadyExistsException" => StoreError::AlreadyExists(parsed.message),
        _ => StoreError::Service {
            status,
            code,
            message: parsed.message,
        },
    }
}

fn ignore_already_exists(
    result: Result<serde::de::IgnoredAny, StoreError>,
) -> Result<(), StoreError> {
    match result {
        Ok(_) | Err(StoreError::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsRequest<'a> {
    log_group_name_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogGroupsResponse {
    #[serde(default)]
    log_groups: Vec<LogGroup>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogGroup {
    log_group_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogGroupRequest<'a> {
    log_group_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name_prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsResponse {
    #[serde(default)]
    log_streams: Vec<LogStream>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStream {
    log_stream_name: String,
    upload_sequence_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLogStreamRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsRequest<'a> {
    log_group_name: &'a str,
    log_stream_name: &'a str,
    log_events: &'a [LogEvent],
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutLogEventsResponse {
    next_sequence_token: Option<String>,
    rejected_log_events_info: Option<serde_json::Value>,
}

#[async_trait]
impl LogStoreClient for HttpLogStoreClient {
    async fn ensure_group_exists(&self, group: &str) -> Result<(), StoreError> {
        let mut next_token = None;
        loop {
            let response: DescribeLogGroupsResponse = self
                .call(
                    "DescribeLogGroups",
                    &DescribeLogGroupsRequest {
                        log_group_name_prefix: group,
                        next_token: next_token.take(),
                    },
                )
                .await?;
            if response
                .log_groups
                .iter()
                .any(|g| g.log_group_name == group)
            {
                return Ok(());
            }
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        debug!("LOGSTREAM | Creating log group {group}");
        ignore_already_exists(
            self.call(
                "CreateLogGroup",
                &CreateLogGroupRequest {
                    log_group_name: group,
                },
            )
            .await,
        )
    }

    async fn describe_streams(
        &self,
        group: &str,
        prefix: &str,
    ) -> Result<Vec<StreamDescription>, StoreError> {
        let mut streams = Vec::new();
        let mut next_token = None;
        loop {
            let response: DescribeLogStreamsResponse = self
                .call(
                    "DescribeLogStreams",
                    &DescribeLogStreamsRequest {
                        log_group_name: group,
                        log_stream_name_prefix: prefix,
                        next_token: next_token.take(),
                    },
                )
                .await?;
            streams.extend(response.log_streams.into_iter().map(|s| StreamDescription {
                name: s.log_stream_name,
                upload_token: s.upload_sequence_token,
            }));
            match response.next_token {
                Some(token) => next_token = Some(token),
                None => return Ok(streams),
            }
        }
    }

    async fn create_stream(&self, group: &str, stream: &str) -> Result<(), StoreError> {
        ignore_already_exists(
            self.call(
                "CreateLogStream",
                &CreateLogStreamRequest {
                    log_group_name: group,
                    log_stream_name: stream,
                },
            )
            .await,
        )
    }

    async fn append_batch(
        &self,
        group: &str,
        stream: &str,
        token: Option<&str>,
        events: &[LogEvent],
    ) -> Result<Option<String>, StoreError> {
        let response: PutLogEventsResponse = self
            .call(
                "PutLogEvents",
                &PutLogEventsRequest {
                    log_group_name: group,
                    log_stream_name: stream,
                    log_events: events,
                    sequence_token: token,
                },
            )
            .await?;
        if let Some(rejected) = response.rejected_log_events_info {
            warn!("LOGSTREAM | Some events were rejected by the log store: {rejected}");
        }
        Ok(response.next_sequence_token)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> HttpLogStoreClient {
        let config = Config {
            endpoint: Some(server.url()),
            ..Config::default()
        };
        HttpLogStoreClient::new(&config).unwrap().with_credentials(None)
    }

    #[tokio::test]
    async fn test_append_sends_events_and_returns_next_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.PutLogEvents")
            .match_header("content-type", CONTENT_TYPE_JSON_1_1)
            .match_body(Matcher::Json(json!({
                "logGroupName": "app",
                "logStreamName": "2024-03-07/host",
                "logEvents": [{"timestamp": 100, "message": "hello"}],
                "sequenceToken": "T1"
            })))
            .with_status(200)
            .with_body(r#"{"nextSequenceToken":"T2"}"#)
            .create_async()
            .await;

        let next = client_for(&server)
            .append_batch("app", "2024-03-07/host", Some("T1"), &[LogEvent::new(100, "hello")])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(next.as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_append_without_token_omits_field() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::Json(json!({
                "logGroupName": "app",
                "logStreamName": "s",
                "logEvents": []
            })))
            .with_status(200)
            .with_body(r#"{"nextSequenceToken":"T1"}"#)
            .create_async()
            .await;

        client_for(&server)
            .append_batch("app", "s", None, &[])
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_sequence_token_maps_expected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(400)
            .with_body(
                r#"{"__type":"com.amazonaws.logs#InvalidSequenceTokenException",
                    "message":"The given sequenceToken is invalid",
                    "expectedSequenceToken":"T9"}"#,
            )
            .create_async()
            .await;

        let result = client_for(&server)
            .append_batch("app", "s", Some("T1"), &[LogEvent::new(1, "a")])
            .await;

        match result {
            Err(StoreError::InvalidToken { expected_token }) => {
                assert_eq!(expected_token.as_deref(), Some("T9"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_data_already_accepted_maps_expected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(400)
            .with_body(
                r#"{"__type":"DataAlreadyAcceptedException","expectedSequenceToken":"T4"}"#,
            )
            .create_async()
            .await;

        let result = client_for(&server)
            .append_batch("app", "s", Some("T3"), &[LogEvent::new(1, "a")])
            .await;

        assert!(matches!(
            result,
            Err(StoreError::DataAlreadyAccepted { expected_token: Some(ref t) }) if t == "T4"
        ));
    }

    #[tokio::test]
    async fn test_other_errors_map_to_service() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let result = client_for(&server)
            .append_batch("app", "s", None, &[LogEvent::new(1, "a")])
            .await;

        match result {
            Err(StoreError::Service {
                status, message, ..
            }) => {
                assert_eq!(status, 503);
                assert_eq!(message, "upstream unavailable");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_describe_streams_follows_pagination() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.DescribeLogStreams")
            .match_body(Matcher::PartialJson(json!({"nextToken": "page-2"})))
            .with_status(200)
            .with_body(r#"{"logStreams":[{"logStreamName":"2024-03-07/b"}]}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.DescribeLogStreams")
            .match_body(Matcher::Json(json!({
                "logGroupName": "app",
                "logStreamNamePrefix": "2024-03-07"
            })))
            .with_status(200)
            .with_body(
                r#"{"logStreams":[{"logStreamName":"2024-03-07/a","uploadSequenceToken":"T5"}],
                    "nextToken":"page-2"}"#,
            )
            .create_async()
            .await;

        let streams = client_for(&server)
            .describe_streams("app", "2024-03-07")
            .await
            .unwrap();

        assert_eq!(
            streams,
            vec![
                StreamDescription {
                    name: "2024-03-07/a".to_string(),
                    upload_token: Some("T5".to_string()),
                },
                StreamDescription {
                    name: "2024-03-07/b".to_string(),
                    upload_token: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_create_stream_tolerates_existing() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogStream")
            .with_status(400)
            .with_body(r#"{"__type":"ResourceAlreadyExistsException","message":"exists"}"#)
            .create_async()
            .await;

        assert!(client_for(&server).create_stream("app", "s").await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_group_creates_missing_group() {
        let mut server = Server::new_async().await;
        let describe = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.DescribeLogGroups")
            .with_status(200)
            .with_body(r#"{"logGroups":[{"logGroupName":"app-other"}]}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
            .match_body(Matcher::Json(json!({"logGroupName": "app"})))
            .with_status(200)
            .create_async()
            .await;

        client_for(&server).ensure_group_exists("app").await.unwrap();

        describe.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_group_skips_existing_group() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.DescribeLogGroups")
            .with_status(200)
            .with_body(r#"{"logGroups":[{"logGroupName":"app"}]}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/")
            .match_header("x-amz-target", "Logs_20140328.CreateLogGroup")
            .expect(0)
            .create_async()
            .await;

        client_for(&server).ensure_group_exists("app").await.unwrap();

        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_signed_requests_carry_authorization() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header(
                "authorization",
                Matcher::Regex(
                    r"^AWS4-HMAC-SHA256 Credential=AKID/\d{8}/us-west-2/logs/aws4_request, SignedHeaders=content-type;host;x-amz-date;x-amz-target, Signature=[0-9a-f]{64}$"
                        .to_string(),
                ),
            )
            .match_header("x-amz-date", Matcher::Regex(r"^\d{8}T\d{6}Z$".to_string()))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client_for(&server)
            .with_credentials(Some(Credentials {
                access_key_id: "AKID".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            }))
            .create_stream("app", "s")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[test]
    fn test_endpoint_host_includes_explicit_port() {
        let config = Config {
            endpoint: Some("http://127.0.0.1:4566".to_string()),
            ..Config::default()
        };
        let client = HttpLogStoreClient::new(&config).unwrap();
        assert_eq!(client.host, "127.0.0.1:4566");
    }
}
