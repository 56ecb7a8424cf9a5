//! Sandbox backend interface and its HTTP implementation.
//!
//! The backend is a black box exposing four operations: start, execute,
//! extend, stop. Each execute call is stateless on the backend side
//! (there is no persistent shell process), so the client re-asserts all
//! shell state (the working directory) in the command string itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::BackendError;

/// Descriptive resource shape of a sandbox. Display-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    pub ram: String,
    pub storage: String,
    pub cpu: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRequest {
    pub user_id: String,
    pub display_name: String,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    pub sandbox_id: String,
    pub credential: String,
    pub os_label: String,
    #[serde(default)]
    pub resources: Resources,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtendRequest {
    pub hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendResponse {
    pub success: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// The four operations the session core depends on.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    async fn start(&self, req: StartRequest) -> Result<StartResponse, BackendError>;
    async fn execute(&self, sandbox_id: &str, command: &str)
        -> Result<ExecuteResponse, BackendError>;
    async fn extend(&self, sandbox_id: &str, hours: u32) -> Result<ExtendResponse, BackendError>;
    async fn stop(&self, sandbox_id: &str) -> Result<(), BackendError>;
}

/// HTTP client for the sandbox backend.
pub struct HttpBackend {
    base: Url,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base.join(path)?)
    }

    /// Map non-2xx responses to a machine status plus the backend's message.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body.trim().to_string()
        };
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SandboxBackend for HttpBackend {
    async fn start(&self, req: StartRequest) -> Result<StartResponse, BackendError> {
        debug!(user_id = %req.user_id, "requesting sandbox");
        let resp = self
            .client
            .post(self.endpoint("sandboxes")?)
            .json(&req)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn execute(
        &self,
        sandbox_id: &str,
        command: &str,
    ) -> Result<ExecuteResponse, BackendError> {
        debug!(sandbox_id, command, "execute");
        let resp = self
            .client
            .post(self.endpoint(&format!("sandboxes/{}/execute", sandbox_id))?)
            .json(&ExecuteRequest {
                command: command.to_string(),
            })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn extend(&self, sandbox_id: &str, hours: u32) -> Result<ExtendResponse, BackendError> {
        debug!(sandbox_id, hours, "extend");
        let resp = self
            .client
            .post(self.endpoint(&format!("sandboxes/{}/extend", sandbox_id))?)
            .json(&ExtendRequest { hours })
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn stop(&self, sandbox_id: &str) -> Result<(), BackendError> {
        debug!(sandbox_id, "stop");
        let resp = self
            .client
            .delete(self.endpoint(&format!("sandboxes/{}", sandbox_id))?)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory backend for the test suites.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Duration;

    use super::*;

    #[derive(Default)]
    pub(crate) struct MockBackend {
        start: Mutex<VecDeque<Result<StartResponse, BackendError>>>,
        exec: Mutex<VecDeque<Result<ExecuteResponse, BackendError>>>,
        extend: Mutex<VecDeque<Result<ExtendResponse, BackendError>>>,
        fail_stop: AtomicBool,
        pub(crate) start_calls: AtomicUsize,
        pub(crate) stop_calls: AtomicUsize,
        pub(crate) commands: Mutex<Vec<String>>,
    }

    impl MockBackend {
        pub(crate) fn new() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self::default())
        }

        pub(crate) fn ok_start(expires_in_secs: i64) -> StartResponse {
            StartResponse {
                sandbox_id: "sbx-1234".into(),
                credential: "hunter2".into(),
                os_label: "ubuntu 22.04".into(),
                resources: Resources {
                    ram: "2GB".into(),
                    storage: "10GB".into(),
                    cpu: "2 vCPU".into(),
                },
                expires_at: Utc::now() + Duration::seconds(expires_in_secs),
            }
        }

        pub(crate) fn ok_exec(output: &str) -> ExecuteResponse {
            ExecuteResponse {
                success: true,
                output: output.to_string(),
                exit_code: 0,
            }
        }

        pub(crate) fn failed_exec(output: &str, exit_code: i32) -> ExecuteResponse {
            ExecuteResponse {
                success: false,
                output: output.to_string(),
                exit_code,
            }
        }

        pub(crate) fn script_start(&self, r: Result<StartResponse, BackendError>) {
            self.start.lock().unwrap().push_back(r);
        }

        pub(crate) fn script_exec(&self, r: Result<ExecuteResponse, BackendError>) {
            self.exec.lock().unwrap().push_back(r);
        }

        pub(crate) fn script_extend(&self, r: Result<ExtendResponse, BackendError>) {
            self.extend.lock().unwrap().push_back(r);
        }

        pub(crate) fn set_fail_stop(&self) {
            self.fail_stop.store(true, Ordering::SeqCst);
        }

        pub(crate) fn commands_seen(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        fn rejected(what: &str) -> BackendError {
            BackendError::Rejected {
                status: 500,
                message: format!("no scripted {} response", what),
            }
        }
    }

    #[async_trait]
    impl SandboxBackend for MockBackend {
        async fn start(&self, _req: StartRequest) -> Result<StartResponse, BackendError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.start
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Self::rejected("start")))
        }

        async fn execute(
            &self,
            _sandbox_id: &str,
            command: &str,
        ) -> Result<ExecuteResponse, BackendError> {
            self.commands.lock().unwrap().push(command.to_string());
            self.exec
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Self::ok_exec("")))
        }

        async fn extend(
            &self,
            _sandbox_id: &str,
            hours: u32,
        ) -> Result<ExtendResponse, BackendError> {
            self.extend.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(ExtendResponse {
                    success: true,
                    expires_at: Some(Utc::now() + Duration::hours(hours as i64)),
                    message: None,
                })
            })
        }

        async fn stop(&self, _sandbox_id: &str) -> Result<(), BackendError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop.load(Ordering::SeqCst) {
                return Err(BackendError::Rejected {
                    status: 503,
                    message: "backend unreachable".into(),
                });
            }
            Ok(())
        }
    }
}
