//! Update orchestration: check in, download, verify, apply, report.
//!
//! One call is one check-in. Every step is a fallible function and the
//! first failure ends the call; nothing is retried. Connections are owned
//! by the step that opened them and are closed before the step returns.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::apply;
use crate::checksum;
use crate::config::UpdaterConfig;
use crate::context::Context;
use crate::download;
use crate::error::{Result, UpdateError};
use crate::http::url::require_secure;
use crate::http::{Connector, Method, TlsConnector, Transport};
use crate::types::{CheckInRequest, Properties, StatusReport, UpdateOffer};

const CHECK_IN_PATH: &str = "/tok/provision/update";
const REPORT_PATH: &str = "/tok/provision/updateReport";

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// Caller-supplied parameters for one check-in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Service base URL, e.g. `https://api.example.com`
    pub host: String,
    pub product: String,
    /// Sent verbatim as the `Authorization` header
    pub token: String,
    pub device: String,
    /// Currently installed version
    pub version: String,
    pub properties: Properties,
    /// Destination of the downloaded artifact
    pub path: PathBuf,
    /// Program run with the artifact path once it verifies
    pub script: Option<PathBuf>,
}

impl UpdateRequest {
    /// Reject missing required values before any network activity.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("host", self.host.is_empty()),
            ("product", self.product.is_empty()),
            ("token", self.token.is_empty()),
            ("device", self.device.is_empty()),
            ("version", self.version.is_empty()),
            ("path", self.path.as_os_str().is_empty()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, empty)| *empty) {
            return Err(UpdateError::InvalidArgument(format!("{} is required", name)));
        }
        if self.script.as_ref().is_some_and(|s| s.as_os_str().is_empty()) {
            return Err(UpdateError::InvalidArgument(
                "apply script path is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a successful call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service has nothing newer
    NoUpdate,
    /// Downloaded and verified; no apply step configured
    Downloaded { version: String },
    /// Applied and reported
    Applied { version: String, update_id: String },
}

/// Orchestration states, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    CheckingIn,
    NoUpdate,
    OfferReceived,
    Downloading,
    Verifying,
    ChecksumMismatch,
    Applying,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CheckingIn => "checking-in",
            Self::NoUpdate => "no-update",
            Self::OfferReceived => "offer-received",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::ChecksumMismatch => "checksum-mismatch",
            Self::Applying => "applying",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Updater
// ---------------------------------------------------------------------------

/// Update client bound to one configuration and connector.
#[derive(Debug, Clone)]
pub struct Updater {
    config: UpdaterConfig,
    transport: Transport,
}

impl Updater {
    /// Client speaking TLS to the real service.
    pub fn new(config: UpdaterConfig) -> Result<Self> {
        let connector = TlsConnector::new(&config)?;
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    /// Client using a custom connector.
    pub fn with_connector(config: UpdaterConfig, connector: Arc<dyn Connector>) -> Self {
        let transport = Transport::new(connector, &config);
        Self { config, transport }
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Run one check-in. Failures are also reported through `ctx`.
    pub fn run(&self, request: &UpdateRequest, ctx: &Context) -> Result<Outcome> {
        enter(ctx, State::Idle);
        let result = self.run_steps(request, ctx);
        if let Err(e) = &result {
            if !matches!(e, UpdateError::ChecksumMismatch { .. }) {
                enter(ctx, State::Failed);
            }
            ctx.error(format_args!("{}", e));
        }
        result
    }

    fn run_steps(&self, request: &UpdateRequest, ctx: &Context) -> Result<Outcome> {
        request.validate()?;

        enter(ctx, State::CheckingIn);
        let Some(offer) = self.check_in(request, ctx)? else {
            enter(ctx, State::NoUpdate);
            ctx.progress(format_args!("No update available"));
            return Ok(Outcome::NoUpdate);
        };

        enter(ctx, State::OfferReceived);
        ctx.progress(format_args!(
            "Update {} available: {}",
            offer.new_version, offer.download_url
        ));
        require_secure(&offer.download_url)?;

        enter(ctx, State::Downloading);
        self.download(&offer.download_url, &request.path, ctx)?;

        enter(ctx, State::Verifying);
        verify(&request.path, &offer.checksum, ctx)?;

        let Some(script) = request.script.as_deref() else {
            enter(ctx, State::Done);
            return Ok(Outcome::Downloaded {
                version: offer.new_version,
            });
        };

        enter(ctx, State::Applying);
        let status = apply::apply(script, &request.path, ctx);
        let success = status == 0;

        enter(ctx, State::Reporting);
        let reported = self.report(request, &offer.update_id, success, ctx);

        if !success {
            if let Err(e) = reported {
                ctx.warn(format_args!("{}", e));
            }
            return Err(UpdateError::ApplyFailed(status));
        }
        reported?;
        enter(ctx, State::Done);

        Ok(Outcome::Applied {
            version: offer.new_version,
            update_id: offer.update_id,
        })
    }

    /// POST the check-in and parse the offer, if any.
    fn check_in(&self, request: &UpdateRequest, ctx: &Context) -> Result<Option<UpdateOffer>> {
        let url = self.service_url(&request.host, CHECK_IN_PATH)?;
        let body = CheckInRequest {
            id: &request.device,
            product: &request.product,
            version: &request.version,
            properties: &request.properties,
        }
        .to_json()?;
        self.fits("Request body", body.len(), self.config.staging_buffer_size)?;

        let headers = self.json_headers(&request.token)?;

        ctx.trace(format_args!("Check-in body: {}", body));
        let response = self
            .transport
            .request(Method::Post, &url, &headers, Some(&body), ctx)?
            .read_string()?;
        ctx.trace(format_args!("Check-in response: {}", response));

        UpdateOffer::from_response(&response)
    }

    fn download(&self, url: &str, path: &Path, ctx: &Context) -> Result<()> {
        let mut session = self
            .transport
            .request(Method::Get, url, "Accept: */*\r\n", None, ctx)?;
        download::save_body(&mut session, path, ctx)?;
        Ok(())
    }

    /// Best-effort report of the apply result. Sent once, never retried.
    fn report(
        &self,
        request: &UpdateRequest,
        update_id: &str,
        success: bool,
        ctx: &Context,
    ) -> Result<()> {
        let send = || -> Result<()> {
            let url = self.service_url(&request.host, REPORT_PATH)?;
            let body = StatusReport {
                success,
                id: &request.device,
                update: update_id,
            }
            .to_json()?;
            self.fits("Report body", body.len(), self.config.staging_buffer_size)?;
            let headers = self.json_headers(&request.token)?;
            ctx.trace(format_args!("Report body: {}", body));
            drop(
                self.transport
                    .request(Method::Post, &url, &headers, Some(&body), ctx)?,
            );
            Ok(())
        };
        send().map_err(|e| UpdateError::Report(Box::new(e)))
    }

    /// Header block for an authorized JSON POST
    fn json_headers(&self, token: &str) -> Result<String> {
        let headers = format!(
            "Content-Type: application/json\r\nAuthorization: {}\r\n",
            token
        );
        self.fits("Request headers", headers.len(), self.config.header_buffer_size)?;
        Ok(headers)
    }

    fn service_url(&self, host: &str, path: &str) -> Result<String> {
        let url = format!("{}{}", host, path);
        self.fits("URL", url.len(), self.config.staging_buffer_size)?;
        Ok(url)
    }

    fn fits(&self, what: &'static str, len: usize, limit: usize) -> Result<()> {
        if len >= limit {
            return Err(UpdateError::TooLong { what, len, limit });
        }
        Ok(())
    }
}

fn enter(ctx: &Context, state: State) {
    ctx.trace(format_args!("state -> {}", state));
}

/// Compare the artifact's digest against the offer. The file is kept on
/// mismatch.
fn verify(path: &Path, expected: &str, ctx: &Context) -> Result<()> {
    let actual = checksum::digest_file(path)?;
    if actual != expected {
        enter(ctx, State::ChecksumMismatch);
        return Err(UpdateError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    ctx.trace(format_args!("Checksum {} verified", actual));
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Check in with default limits over TLS.
pub fn update(request: &UpdateRequest, ctx: &Context) -> Result<Outcome> {
    update_with(UpdaterConfig::default(), request, ctx)
}

/// Check in with explicit limits over TLS.
///
/// Arguments are validated before the trust store is loaded.
pub fn update_with(config: UpdaterConfig, request: &UpdateRequest, ctx: &Context) -> Result<Outcome> {
    if let Err(e) = request.validate() {
        ctx.error(format_args!("{}", e));
        return Err(e);
    }
    let updater = Updater::new(config).map_err(|e| {
        ctx.error(format_args!("{}", e));
        e
    })?;
    updater.run(request, ctx)
}
