use std::path::PathBuf;
use std::sync::Arc;

use crate::{EffectiveConfig, Logger, NatsServer, NatsServerOptions, Result};

/// Fluent construction of a [`NatsServer`].
///
/// ```rust,no_run
/// # async fn demo() -> nats_memory_server::Result<()> {
/// let mut server = nats_memory_server::NatsServerBuilder::new()
///     .verbose(false)
///     .ip("127.0.0.1")
///     .launch()
///     .await?;
/// println!("broker at {:?}", server.url());
/// server.stop().await
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct NatsServerBuilder {
    options: NatsServerOptions,
    bin_path: Option<PathBuf>,
}

impl NatsServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: NatsServerOptions) -> Self {
        Self {
            options,
            bin_path: None,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.options.verbose = verbose;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.options.port = Some(port);
        self
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.options.ip = ip.into();
        self
    }

    /// Replace the extra broker arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one extra broker argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.options.args.push(arg.into());
        self
    }

    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.options.logger = Arc::new(logger);
        self
    }

    pub fn shared_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.options.logger = logger;
        self
    }

    /// Use this binary instead of the one from the project configuration.
    pub fn bin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bin_path = Some(path.into());
        self
    }

    pub fn options(&self) -> &NatsServerOptions {
        &self.options
    }

    /// Build a server that is not started yet.
    ///
    /// Without an explicit [`bin_path`](Self::bin_path) the binary location is
    /// taken from the project configuration of the current directory.
    pub fn build(self) -> Result<NatsServer> {
        let bin_path = match self.bin_path {
            Some(path) => path,
            None => EffectiveConfig::discover()?.bin_path,
        };
        Ok(NatsServer::new(self.options, bin_path))
    }

    /// Make sure a binary exists (downloading it if needed), then start it.
    pub async fn launch(self) -> Result<NatsServer> {
        let bin_path = match self.bin_path {
            Some(path) => path,
            None => crate::ensure_binary(&EffectiveConfig::discover()?).await?,
        };

        let mut server = NatsServer::new(self.options, bin_path);
        server.start().await?;
        Ok(server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_copy_into_options() {
        let base = NatsServerBuilder::new().ip("127.0.0.1");
        let builder = base.clone().verbose(false).port(4333).args(["-js"]).arg("-DV");

        let options = builder.options();
        assert!(!options.verbose);
        assert_eq!(options.ip, "127.0.0.1");
        assert_eq!(options.port, Some(4333));
        assert_eq!(options.args, ["-js", "-DV"]);

        // cloning leaves `base` as it was
        assert!(base.options().verbose);
        assert_eq!(base.options().port, None);
    }

    #[test]
    fn explicit_bin_path() {
        let server = NatsServerBuilder::new()
            .bin_path("/opt/nats/nats-server")
            .build()
            .unwrap();
        assert_eq!(server.bin_path(), std::path::Path::new("/opt/nats/nats-server"));
    }
}
