//! Concrete [`VersionSource`](crate::version::source::VersionSource) implementations
//!
//! - [`command::CommandVersionSource`]: local facts from `<binary> --version`,
//!   latest version from `npm view`
//! - [`npm::NpmRegistrySource`]: local facts from commands, latest version
//!   from the npm registry HTTP API

pub mod command;
pub mod npm;

/// Executable name for a tool whose binary differs from its name
pub fn binary_name(tool: &str) -> &str {
    match tool {
        "typescript" => "tsc",
        "gemini-cli" => "gemini",
        "angular-cli" => "ng",
        _ => tool,
    }
}

/// npm package publishing a tool whose package differs from its name
pub fn package_name(tool: &str) -> &str {
    match tool {
        "gemini-cli" => "@google/gemini-cli",
        "codex" => "@openai/codex",
        "angular-cli" => "@angular/cli",
        _ => tool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("typescript", "tsc", "typescript")]
    #[case("gemini-cli", "gemini", "@google/gemini-cli")]
    #[case("codex", "codex", "@openai/codex")]
    #[case("pnpm", "pnpm", "pnpm")]
    fn maps_tool_to_binary_and_package(
        #[case] tool: &str,
        #[case] binary: &str,
        #[case] package: &str,
    ) {
        assert_eq!(binary_name(tool), binary);
        assert_eq!(package_name(tool), package);
    }
}
