//! Where to fetch nats-server from.

const RELEASES_URL: &str = "https://github.com/nats-io/nats-server/releases/download";
const ARCHIVE_URL: &str = "https://github.com/nats-io/nats-server/archive/refs/tags";

/// Download URL for `version`.
///
/// With `build_from_source` this is the tag's source archive and `platform`
/// and `arch` are ignored, otherwise the prebuilt release zip for the given
/// platform/arch pair.
pub fn download_url(version: &str, platform: &str, arch: &str, build_from_source: bool) -> String {
    if build_from_source {
        return format!("{ARCHIVE_URL}/{version}.zip");
    }

    let platform = normalize_platform(platform);
    let arch = normalize_arch(arch);
    format!("{RELEASES_URL}/{version}/nats-server-{version}-{platform}-{arch}.zip")
}

/// Download URL for `version` on the host we are running on.
pub fn host_download_url(version: &str, build_from_source: bool) -> String {
    download_url(version, host_platform(), host_arch(), build_from_source)
}

/// Platform name as used in nats-server release artifacts.
pub fn normalize_platform(platform: &str) -> &str {
    match platform {
        "win32" => "windows",
        "macos" => "darwin",
        other => other,
    }
}

/// Architecture name as used in nats-server release artifacts.
pub fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x64" | "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

pub fn host_platform() -> &'static str {
    normalize_platform(std::env::consts::OS)
}

pub fn host_arch() -> &'static str {
    normalize_arch(std::env::consts::ARCH)
}
