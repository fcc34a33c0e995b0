//! Evaluation of `{{ .Field }}` placeholders in configuration strings.
//!
//! Supported fields: `.ProjectName`, `.Tag`, `.PreviousTag`, `.Version`
//! (the tag without its leading `v`), `.Major`, `.Minor`, `.Patch`,
//! `.Prerelease` and `.Env.NAME`.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use herald_config::BoolTemplate;
use semver::Version;

#[derive(Debug, Clone, Default)]
pub struct TemplateEnv {
    pub project_name: String,
    pub tag: String,
    pub previous_tag: String,
    pub semver: Option<Version>,
    pub env: BTreeMap<String, String>,
}

impl TemplateEnv {
    pub fn apply(&self, source: &str) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let action = &rest[start + 2..];
            let Some(end) = action.find("}}") else {
                bail!("template: {source}: unclosed action");
            };
            out.push_str(&self.field(source, action[..end].trim())?);
            rest = &action[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Evaluates `source` and reports whether it reads `true`.
    pub fn bool(&self, source: &str) -> Result<bool> {
        Ok(self.apply(source)?.trim().eq_ignore_ascii_case("true"))
    }

    pub fn eval_bool(&self, value: &BoolTemplate) -> Result<bool> {
        match value {
            BoolTemplate::Literal(b) => Ok(*b),
            BoolTemplate::Template(source) => self.bool(source),
        }
    }

    fn field(&self, source: &str, expr: &str) -> Result<String> {
        if let Some(key) = expr.strip_prefix(".Env.") {
            return match self.env.get(key) {
                Some(value) => Ok(value.clone()),
                None => bail!("template: {source}: map has no entry for key {key:?}"),
            };
        }

        let value = match expr {
            ".ProjectName" => self.project_name.clone(),
            ".Tag" => self.tag.clone(),
            ".PreviousTag" => self.previous_tag.clone(),
            ".Version" => self.tag.strip_prefix('v').unwrap_or(&self.tag).to_string(),
            ".Major" => self.version(source)?.major.to_string(),
            ".Minor" => self.version(source)?.minor.to_string(),
            ".Patch" => self.version(source)?.patch.to_string(),
            ".Prerelease" => self.version(source)?.pre.to_string(),
            other => bail!(
                "template: {source}: can't evaluate field {}",
                other.trim_start_matches('.')
            ),
        };
        Ok(value)
    }

    fn version(&self, source: &str) -> Result<&Version> {
        match &self.semver {
            Some(version) => Ok(version),
            None => bail!(
                "template: {source}: tag {:?} is not a semantic version",
                self.tag
            ),
        }
    }
}

/// Parses `tag` as a semantic version, ignoring a leading `v`.
pub fn parse_semver(tag: &str) -> Option<Version> {
    Version::parse(tag.strip_prefix('v').unwrap_or(tag)).ok()
}
