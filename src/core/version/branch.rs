use serde::{Deserialize, Serialize};

/// Release channel of the remote game.
///
/// Any textual input is canonicalized deterministically; unknown values fall
/// back to [`Branch::Release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Branch {
    Release,
    PreRelease,
}

impl Branch {
    pub const ALL: [Branch; 2] = [Branch::Release, Branch::PreRelease];

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Release => "release",
            Branch::PreRelease => "pre-release",
        }
    }

    pub fn parse(raw: &str) -> Branch {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pre-release" | "prerelease" | "pre_release" | "beta" => Branch::PreRelease,
            _ => Branch::Release,
        }
    }
}

/// Canonical on-disk name for a user supplied version type.
pub fn normalize_version_type(raw: &str) -> &'static str {
    Branch::parse(raw).as_str()
}

impl Default for Branch {
    fn default() -> Self {
        Branch::Release
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Branch {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Branch::parse(s))
    }
}

impl From<String> for Branch {
    fn from(value: String) -> Self {
        Branch::parse(&value)
    }
}

impl From<Branch> for String {
    fn from(value: Branch) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_type_aliases_collapse() {
        assert_eq!(normalize_version_type("prerelease"), "pre-release");
        assert_eq!(normalize_version_type("pre-release"), "pre-release");
        assert_eq!(normalize_version_type(" Pre_Release "), "pre-release");
        assert_eq!(normalize_version_type("latest"), "release");
        assert_eq!(normalize_version_type(""), "release");
        assert_eq!(normalize_version_type("RELEASE"), "release");
    }

    #[test]
    fn branch_serde_normalizes_input() {
        let parsed: Vec<Branch> = serde_json::from_str(r#"["prerelease", "latest"]"#).unwrap();
        assert_eq!(parsed, vec![Branch::PreRelease, Branch::Release]);
        assert_eq!(
            serde_json::to_string(&Branch::PreRelease).unwrap(),
            "\"pre-release\""
        );
    }
}
