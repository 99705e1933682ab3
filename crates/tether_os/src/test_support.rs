#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use tether_engines::http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, TransportErrorKind,
};
use tether_kernel_contracts::installation::InstallationIdentity;

use crate::config::TetherConfig;
use crate::probe::StaticInstallationProbe;

pub const T0: u64 = 1_700_000_000;
pub const HOUR: u64 = 3_600;

/// Replays queued results in order and records every request it sees.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, status: u16, body: &str) {
        self.script.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_transport_error(&self, kind: TransportErrorKind) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(HttpError::transport(kind, "scripted failure")));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(HttpError::transport(
                TransportErrorKind::Connection,
                "no scripted response left",
            ))
        })
    }
}

pub fn config() -> TetherConfig {
    TetherConfig::mvp_v1("https://cp.example/api", "acme/storefront", None).unwrap()
}

pub fn identity(product_version: &str) -> InstallationIdentity {
    InstallationIdentity::v1(
        "https://shop.example".to_string(),
        product_version.to_string(),
        "6.5.2".to_string(),
        "8.2.10".to_string(),
        vec![
            "woocommerce/woocommerce.php".to_string(),
            "akismet/akismet.php".to_string(),
        ],
    )
    .unwrap()
}

pub fn probe(product_version: &str) -> StaticInstallationProbe {
    StaticInstallationProbe::new(identity(product_version))
}
