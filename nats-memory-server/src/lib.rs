//! Disposable nats-server brokers for integration tests.
//!
//! [`ensure_binary`] downloads (or builds) a nats-server binary according to the
//! project configuration, [`NatsServer`] runs it on a free port and tears it
//! down again.

#![deny(unused_extern_crates)]
#![deny(unused_crate_dependencies)]
#![deny(unsafe_code)]

use clap as _;
use clap_verbosity_flag as _;
use colored as _;
use eyre as _;
use tracing_subscriber as _;

#[cfg(test)]
use wiremock as _;

pub mod artifact;
mod builder;
pub mod config;
mod download;
mod error;
mod install;
mod logger;
mod port;
mod server;

pub use artifact::{download_url, host_download_url};
pub use builder::NatsServerBuilder;
pub use config::{
    ConfigCache, ConfigLayer, EffectiveConfig, find_project_root, resolve, resolve_with,
};
pub use download::{ProxyOptions, content_disposition_filename, download_file, safe_destination};
pub use error::{Error, Result};
pub use install::{BuildCommand, ensure_binary, ensure_binary_with, install_archive};
pub use logger::{Logger, TracingLogger};
pub use port::free_port;
pub use server::{
    ACCEPTED_EXIT_CODES, DEFAULT_IP, NatsServer, NatsServerOptions, READY_MARKER, ServerState,
    launch_args,
};
