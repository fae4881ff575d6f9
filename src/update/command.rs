//! Install command lines per tool

use crate::version::sources::package_name;

/// Command line that installs `version` of `tool` (the newest when `None`).
///
/// A few tools have their own upgrade mechanism; everything else is treated
/// as a globally installed npm package.
pub fn get_update_command(tool: &str, version: Option<&str>) -> String {
    match (tool, version) {
        ("npm", version) => format!("npm install -g npm@{}", version.unwrap_or("latest")),
        ("rust" | "rustc" | "rustup", Some(version)) => format!("rustup install {version}"),
        ("rust" | "rustc" | "rustup", None) => "rustup update".to_string(),
        ("deno", Some(version)) => format!("deno upgrade --version {version}"),
        ("deno", None) => "deno upgrade".to_string(),
        ("pip", Some(version)) => format!("python -m pip install --upgrade pip=={version}"),
        ("pip", None) => "python -m pip install --upgrade pip".to_string(),
        (tool, version) => format!(
            "npm install -g {}@{}",
            package_name(tool),
            version.unwrap_or("latest")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("npm", Some("10.5.0"), "npm install -g npm@10.5.0")]
    #[case("npm", None, "npm install -g npm@latest")]
    #[case("rustup", None, "rustup update")]
    #[case("rust", Some("1.80.0"), "rustup install 1.80.0")]
    #[case("deno", Some("1.44.0"), "deno upgrade --version 1.44.0")]
    #[case("pip", None, "python -m pip install --upgrade pip")]
    #[case("typescript", Some("5.4.5"), "npm install -g typescript@5.4.5")]
    #[case("codex", None, "npm install -g @openai/codex@latest")]
    fn get_update_command_returns_expected(
        #[case] tool: &str,
        #[case] version: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(get_update_command(tool, version), expected);
    }
}
