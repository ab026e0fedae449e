//! HTTP健康检测实现
//!
//! 发起一次HTTP请求并根据状态码判断是否健康

use crate::config::HttpCheckConfig;
use crate::error::{HealthCheckError, Result};
use crate::health::check::{Check, CheckKind};
use crate::health::result::ProbeOutcome;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;

/// HTTP健康检测
pub struct HttpCheck {
    /// 检测配置
    config: HttpCheckConfig,
    /// HTTP客户端
    client: Client,
}

impl HttpCheck {
    /// 创建新的HTTP检测
    ///
    /// 不复用空闲连接，保证每次探测都是一次新的连接
    pub fn new(config: HttpCheckConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()
            .map_err(HealthCheckError::RequestError)?;

        Ok(Self { config, client })
    }

    /// 构建HTTP请求
    ///
    /// 方法、URL或请求头无效时返回配置错误
    fn build_request(&self, timeout_duration: Duration) -> Result<reqwest::RequestBuilder> {
        let method = Method::from_str(&self.config.method.to_uppercase()).map_err(|_| {
            self.invalid_spec(format!("无效的HTTP方法: {}", self.config.method))
        })?;

        let url = Url::parse(&self.config.url)
            .map_err(|e| self.invalid_spec(format!("无效的URL {}: {}", self.config.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(self.invalid_spec(format!("不支持的URL协议: {}", url.scheme())));
        }

        let mut request = self.client.request(method, url).timeout(timeout_duration);

        for (key, value) in &self.config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| self.invalid_spec(format!("无效的请求头名称 {:?}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| self.invalid_spec(format!("请求头 {} 的值无效: {}", key, e)))?;
            request = request.header(name, value);
        }

        if let Some(body) = &self.config.body {
            request = request.body(body.clone());
        }

        Ok(request)
    }

    fn invalid_spec(&self, reason: String) -> crate::error::VitalsError {
        HealthCheckError::InvalidSpec {
            check: self.config.name.clone(),
            reason,
        }
        .into()
    }

    /// 验证响应状态码
    ///
    /// 未配置期望状态码时接受任意2xx
    fn validate_status_code(&self, status: StatusCode) -> bool {
        if self.config.expect.is_empty() {
            status.is_success()
        } else {
            self.config.expect.contains(&status.as_u16())
        }
    }

    /// 格式化请求错误信息
    fn format_request_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            let error_str = format!("{:?}", error).to_lowercase();
            if error_str.contains("refused") {
                "Connection refused".to_string()
            } else if error_str.contains("dns") {
                "DNS resolution failed".to_string()
            } else {
                format!("Connection failed: {}", error)
            }
        } else if error.is_request() {
            "Invalid request".to_string()
        } else if let Some(status) = error.status() {
            format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )
        } else if error.is_decode() {
            "Response decode error".to_string()
        } else {
            let error_str = error.to_string();
            if error_str.contains("certificate")
                || error_str.contains("tls")
                || error_str.contains("ssl")
            {
                "SSL/TLS certificate error".to_string()
            } else {
                format!("Request failed: {}", error_str)
            }
        }
    }
}

#[async_trait]
impl Check for HttpCheck {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> CheckKind {
        CheckKind::Http
    }

    fn target(&self) -> String {
        format!("{} {}", self.config.method.to_uppercase(), self.config.url)
    }

    async fn attempt(&self, timeout_duration: Duration) -> Result<ProbeOutcome> {
        let request = self.build_request(timeout_duration)?;

        let outcome = match timeout(timeout_duration, request.send()).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if self.validate_status_code(status) {
                    ProbeOutcome::Success
                } else {
                    ProbeOutcome::Failure(format!(
                        "HTTP {} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("Unknown")
                    ))
                }
            }
            Ok(Err(e)) if e.is_timeout() => ProbeOutcome::TimedOut,
            Ok(Err(e)) => ProbeOutcome::Failure(Self::format_request_error(&e)),
            Err(_) => ProbeOutcome::TimedOut,
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn create_test_check(url: &str, expect: Vec<u16>) -> HttpCheck {
        HttpCheck::new(HttpCheckConfig {
            name: "api".to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            expect,
            body: None,
            headers: HashMap::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let check = create_test_check(&format!("{}/health", server.url()), vec![]);
        let outcome = check.attempt(Duration::from_secs(2)).await.unwrap();

        assert_eq!(outcome, ProbeOutcome::Success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_unexpected_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let check = create_test_check(&format!("{}/health", server.url()), vec![]);
        let outcome = check.attempt(Duration::from_secs(2)).await.unwrap();

        assert_eq!(
            outcome,
            ProbeOutcome::Failure("HTTP 503 Service Unavailable".to_string())
        );
    }

    #[tokio::test]
    async fn test_http_explicit_expect_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(204)
            .create_async()
            .await;

        let url = format!("{}/health", server.url());
        let accepts_204 = create_test_check(&url, vec![204]);
        assert!(accepts_204
            .attempt(Duration::from_secs(2))
            .await
            .unwrap()
            .is_success());

        let only_200 = create_test_check(&url, vec![200]);
        assert!(!only_200
            .attempt(Duration::from_secs(2))
            .await
            .unwrap()
            .is_success());
    }

    #[tokio::test]
    async fn test_http_post_with_headers_and_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ready")
            .match_header("x-probe", "launch")
            .match_body("ping")
            .with_status(200)
            .create_async()
            .await;

        let mut headers = HashMap::new();
        headers.insert("x-probe".to_string(), "launch".to_string());
        let check = HttpCheck::new(HttpCheckConfig {
            name: "ready".to_string(),
            url: format!("{}/ready", server.url()),
            method: "post".to_string(),
            expect: vec![200],
            body: Some("ping".to_string()),
            headers,
        })
        .unwrap();

        let outcome = check.attempt(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome, ProbeOutcome::Success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let check = create_test_check(&format!("http://127.0.0.1:{port}/health"), vec![]);
        let outcome = check.attempt(Duration::from_secs(2)).await.unwrap();

        match outcome {
            ProbeOutcome::Failure(reason) => {
                assert!(
                    reason.contains("Connection") || reason.contains("request"),
                    "unexpected reason: {reason}"
                )
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_timeout() {
        // 只接受连接但从不响应
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let check = create_test_check(&format!("http://{addr}/slow"), vec![]);
        let started = std::time::Instant::now();
        let outcome = check.attempt(Duration::from_millis(200)).await.unwrap();

        assert_eq!(outcome, ProbeOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_invalid_method_is_configuration_fault() {
        let check = HttpCheck::new(HttpCheckConfig {
            name: "bad".to_string(),
            url: "http://127.0.0.1:1/".to_string(),
            method: "GET IT".to_string(),
            expect: vec![],
            body: None,
            headers: HashMap::new(),
        })
        .unwrap();

        let err = check.attempt(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_invalid_url_is_configuration_fault() {
        let check = create_test_check("not a url", vec![]);
        let err = check.attempt(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("无效的URL"));
    }

    #[tokio::test]
    async fn test_invalid_header_is_configuration_fault() {
        let mut bad_name = HashMap::new();
        bad_name.insert("bad header\n".to_string(), "x".to_string());
        let mut bad_value = HashMap::new();
        bad_value.insert("x-trace".to_string(), "line\nbreak".to_string());

        for headers in [bad_name, bad_value] {
            let check = HttpCheck::new(HttpCheckConfig {
                name: "h".to_string(),
                url: "http://127.0.0.1:1/".to_string(),
                method: "GET".to_string(),
                expect: vec![],
                body: None,
                headers,
            })
            .unwrap();

            let err = check.attempt(Duration::from_secs(1)).await.unwrap_err();
            assert!(err.is_fatal(), "unexpected error: {err}");
        }
    }

    #[test]
    fn test_validate_status_code() {
        let any_2xx = create_test_check("http://127.0.0.1/", vec![]);
        assert!(any_2xx.validate_status_code(StatusCode::OK));
        assert!(any_2xx.validate_status_code(StatusCode::NO_CONTENT));
        assert!(!any_2xx.validate_status_code(StatusCode::MOVED_PERMANENTLY));
        assert!(!any_2xx.validate_status_code(StatusCode::INTERNAL_SERVER_ERROR));

        let explicit = create_test_check("http://127.0.0.1/", vec![200, 401]);
        assert!(explicit.validate_status_code(StatusCode::UNAUTHORIZED));
        assert!(!explicit.validate_status_code(StatusCode::CREATED));
    }

    #[test]
    fn test_target_description() {
        let check = create_test_check("http://127.0.0.1:8080/health", vec![]);
        assert_eq!(check.target(), "GET http://127.0.0.1:8080/health");
        assert_eq!(check.kind(), CheckKind::Http);
        assert_eq!(check.name(), "api");
    }
}
