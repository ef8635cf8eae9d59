//! Secure requests to the server's web endpoint

mod https;
mod pinning;

pub use https::HttpsRequestClient;
pub use pinning::PinnedCertVerifier;

use crate::common::SessionInfo;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// What to send: path, extra headers, optional body
#[derive(Debug, Clone, Default)]
pub struct RequestParameters {
    path: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl RequestParameters {
    pub fn new(path: impl Into<String>) -> Self {
        RequestParameters {
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Reject parameters no attempt could ever succeed with
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::misuse("request path cannot be empty"));
        }
        if !self.path.starts_with('/') {
            return Err(Error::misuse(format!(
                "request path must be absolute: {}",
                self.path
            )));
        }
        Ok(())
    }
}

/// Performs one HTTPS request attempt
#[async_trait]
pub trait SecureRequestClient: Send + Sync {
    /// Request `params` from the session's server on `port`, either
    /// directly or through the local proxy of whichever tunnel is up.
    /// Returns the response body on success.
    async fn attempt(
        &self,
        session: &SessionInfo,
        port: u16,
        params: &RequestParameters,
        via_local_proxy: bool,
    ) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_builder() {
        let params = RequestParameters::new("/status")
            .with_header("X-Client", "cli")
            .with_body("payload");
        assert_eq!(params.path(), "/status");
        assert_eq!(params.headers(), &[("X-Client".to_string(), "cli".to_string())]);
        assert_eq!(params.body().unwrap().as_ref(), b"payload");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_parameters_validation() {
        assert!(matches!(
            RequestParameters::new("").validate(),
            Err(Error::Misuse(_))
        ));
        assert!(matches!(
            RequestParameters::new("status").validate(),
            Err(Error::Misuse(_))
        ));
    }
}
