//! Getting a runnable nats-server onto disk: unpack the downloaded archive and,
//! for source archives, build it.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::{EffectiveConfig, Error, Result};

/// Marker of an unpacked nats-server source tree.
const SOURCE_MARKER: &str = "go.mod";

/// External command that turns an unpacked source tree into a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BuildCommand {
    fn default() -> Self {
        Self {
            program: "go".to_string(),
            args: vec!["build".to_string()],
        }
    }
}

impl BuildCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run the build in `dir`, streaming its output to the log.
    pub async fn run(&self, dir: &Path) -> Result<()> {
        tracing::info!(program = %self.program, args = ?self.args, dir = %dir.display(), "building nats-server from source");

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, _, _) = tokio::join!(
            child.wait(),
            forward_output(stdout, "stdout"),
            forward_output(stderr, "stderr"),
        );
        let status = status?;

        if status.success() {
            tracing::info!("nats-server built successfully");
            Ok(())
        } else {
            tracing::error!(code = ?status.code(), "nats-server build failed");
            Err(Error::BuildFailed {
                exit_code: status.code(),
            })
        }
    }
}

async fn forward_output<R: AsyncRead + Unpin>(reader: Option<R>, stream: &'static str) {
    let Some(reader) = reader else { return };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                tracing::info!(stream, "{}", line.trim_end_matches(['\r', '\n']));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream, "failed to read build output: {e}");
                break;
            }
        }
    }
}

/// Unpack the zip at `archive` into `target_dir`, dropping the first path
/// component of every entry.
///
/// Entries are extracted into a staging directory next to `target_dir` and
/// moved into place once the whole archive was read. A missing `target_dir`
/// is created by a single rename of the staging directory. An existing one is
/// updated entry by entry, so a failing rename there can leave it mixed.
pub async fn install_archive(archive: &Path, target_dir: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let target_dir = target_dir.to_path_buf();
    tokio::task::spawn_blocking(move || extract_stripped(&archive, &target_dir))
        .await
        .map_err(std::io::Error::other)?
}

fn extract_stripped(archive_path: &Path, target_dir: &Path) -> Result<()> {
    let extraction = |message: String| Error::Extraction {
        archive: archive_path.to_path_buf(),
        message,
    };

    let parent = target_dir.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".nats-staging-")
        .tempdir_in(parent)?;

    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| extraction(e.to_string()))?;

    let mut files = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| extraction(e.to_string()))?;
        let Some(name) = entry.enclosed_name() else {
            return Err(extraction(format!(
                "entry {:?} points outside the archive",
                entry.name()
            )));
        };

        let relative: PathBuf = name.components().skip(1).collect();
        if relative.as_os_str().is_empty() {
            continue;
        }

        let out = staging.path().join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(dir) = out.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut writer = std::fs::File::create(&out)?;
        std::io::copy(&mut entry, &mut writer)?;
        files += 1;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }

    if !target_dir.exists() {
        // dropping `staging` afterwards finds nothing left to clean up
        std::fs::rename(staging.path(), target_dir)?;
        // temp dirs are created owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(target_dir, std::fs::Permissions::from_mode(0o755))?;
        }
        tracing::info!(files, target = %target_dir.display(), "archive extracted");
        return Ok(());
    }

    for entry in std::fs::read_dir(staging.path())? {
        let entry = entry?;
        let dest = target_dir.join(entry.file_name());
        if dest.is_dir() {
            std::fs::remove_dir_all(&dest)?;
        } else if dest.exists() {
            std::fs::remove_file(&dest)?;
        }
        std::fs::rename(entry.path(), &dest)?;
    }

    tracing::info!(files, target = %target_dir.display(), "archive extracted");
    Ok(())
}

/// Make sure the nats-server binary described by `config` exists and return
/// its path. Does nothing if it is already there.
pub async fn ensure_binary(config: &EffectiveConfig) -> Result<PathBuf> {
    ensure_binary_with(config, &BuildCommand::default()).await
}

/// Like [`ensure_binary`] with a custom build command.
pub async fn ensure_binary_with(config: &EffectiveConfig, build: &BuildCommand) -> Result<PathBuf> {
    let bin_path = &config.bin_path;
    if bin_path.exists() {
        tracing::debug!(path = %bin_path.display(), "nats-server found in cache");
        return Ok(bin_path.clone());
    }

    if !config.download {
        return Err(Error::DownloadDisabled {
            bin_path: bin_path.clone(),
        });
    }

    let have_sources =
        config.build_from_source && config.download_dir.join(SOURCE_MARKER).exists();

    if have_sources {
        tracing::info!(dir = %config.download_dir.display(), "reusing downloaded sources");
    } else {
        tracing::info!(version = %config.version, "nats-server not found in cache, downloading");
        let url = config.resolved_download_url();
        let scratch = tempfile::Builder::new()
            .prefix("nats-memory-server-")
            .tempdir()?;
        let archive = crate::download_file(&url, scratch.path(), &config.proxy).await?;
        install_archive(&archive, &config.download_dir).await?;
    }

    if config.build_from_source && !bin_path.exists() {
        build.run(&config.download_dir).await?;
    }

    if !bin_path.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("nats-server binary not found at {}", bin_path.display()),
        )));
    }

    Ok(bin_path.clone())
}
