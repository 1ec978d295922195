//! Facts about the machine this process runs on.

/// OS family.
#[inline]
pub fn platform() -> &'static str {
    std::env::consts::OS
}

/// Architecture in the naming Kubernetes release artifacts use (`amd64`, `arm64`, ...).
pub fn arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

/// Host name, if it is valid UTF-8.
pub fn hostname() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}

/// `PRETTY_NAME` from os-release content.
pub fn parse_pretty_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        line.trim()
            .strip_prefix("PRETTY_NAME=")
            .map(|v| v.trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

/// OS distribution of this host, best effort.
///
/// Returns the name from `/etc/os-release` or the generic platform name.
pub fn os_info() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/etc/os-release")
            && let Some(name) = parse_pretty_name(&content)
        {
            return name;
        }
    }

    platform().to_string()
}
