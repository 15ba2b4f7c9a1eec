use std::path::PathBuf;

use clap::error::ErrorKind as ClapErrorKind;
use clap::{CommandFactory, Parser};

use crate::config::RequestDefaults;
use crate::context::Context;
use crate::updater::UpdateRequest;

/// Artifact destination when neither the command line nor the config names one
pub const DEFAULT_FILE: &str = "update.bin";

/// A3S OTA - Check for, download, verify and apply device updates
#[derive(Debug, Parser)]
#[command(name = "a3s-ota", about, disable_version_flag = true)]
pub struct Cli {
    /// Update service base URL (https://...)
    #[arg(long)]
    pub host: Option<String>,

    /// Product identifier
    #[arg(long)]
    pub product: Option<String>,

    /// Authorization token
    #[arg(long)]
    pub token: Option<String>,

    /// Device identifier
    #[arg(long)]
    pub device: Option<String>,

    /// Currently installed version
    #[arg(long = "version", value_name = "VERSION")]
    pub firmware_version: Option<String>,

    /// Where to save the downloaded update [default: update.bin]
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Program to run with the downloaded file once it verifies
    #[arg(long, value_name = "SCRIPT")]
    pub cmd: Option<PathBuf>,

    /// Configuration file [default: ~/.a3s/ota/config.toml]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Trace every step
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Print nothing; only the exit status reports the result
    #[arg(short, long)]
    pub quiet: bool,

    /// Device properties sent with the check-in
    #[arg(value_name = "KEY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,
}

fn parse_property(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", arg)),
    }
}

impl Cli {
    pub fn context(&self) -> Context {
        Context::new(self.verbose, self.quiet)
    }

    /// Default log filter for the binary's subscriber
    pub fn log_directive(&self) -> &'static str {
        if self.quiet {
            "off"
        } else if self.verbose {
            "a3s_ota=debug"
        } else {
            "a3s_ota=info"
        }
    }

    /// Merge flags over config-file defaults into a complete request.
    ///
    /// Command-line properties override config properties with the same key.
    pub fn into_request(self, defaults: RequestDefaults) -> Result<UpdateRequest, clap::Error> {
        let mut properties = defaults.properties;
        properties.extend(self.properties);

        Ok(UpdateRequest {
            host: required("--host", self.host.or(defaults.host))?,
            product: required("--product", self.product.or(defaults.product))?,
            token: required("--token", self.token.or(defaults.token))?,
            device: required("--device", self.device.or(defaults.device))?,
            version: required("--version", self.firmware_version)?,
            properties,
            path: self
                .file
                .or(defaults.file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FILE)),
            script: self.cmd.or(defaults.cmd),
        })
    }
}

fn required(flag: &str, value: Option<String>) -> Result<String, clap::Error> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Cli::command().error(
            ClapErrorKind::MissingRequiredArgument,
            format!("{} is required", flag),
        )),
    }
}
