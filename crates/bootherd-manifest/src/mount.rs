//! Path rules and mount resolution
//!
//! Both file transports (TFTP and HTTP) map a request path to one of the
//! record's [`PathRule`]s and then dispatch on its content source.

use crate::error::{ManifestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use url::Url;

/// A path exposed to a machine over TFTP and HTTP
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    /// Selector path; a leading `/` is ignored when matching
    #[serde(default)]
    pub path: String,

    /// Treat `path` as a prefix instead of an exact selector
    #[serde(default)]
    pub path_is_prefix: bool,

    /// Upstream URL requests are forwarded to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy: String,

    /// Append the unmatched part of the request path to the proxy target
    /// or local directory
    #[serde(default)]
    pub append_suffix: bool,

    /// Inline content template
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Directory on the host; relative paths resolve against the transport root
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub local_dir: String,
}

/// Where the bytes for a matched rule come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountSource<'a> {
    Proxy(&'a str),
    Content(&'a str),
    LocalDir(&'a str),
}

impl PathRule {
    /// Exact selector serving a local directory entry
    pub fn exact(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Prefix selector
    pub fn prefix(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            path_is_prefix: true,
            ..Default::default()
        }
    }

    pub fn with_proxy(mut self, target: impl Into<String>) -> Self {
        self.proxy = target.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_local_dir(mut self, dir: impl Into<String>) -> Self {
        self.local_dir = dir.into();
        self
    }

    pub fn with_append_suffix(mut self, append: bool) -> Self {
        self.append_suffix = append;
        self
    }

    /// The single content source of this rule
    pub fn source(&self) -> Result<MountSource<'_>> {
        let sources = [
            (!self.proxy.is_empty()).then_some(MountSource::Proxy(&self.proxy)),
            (!self.content.is_empty()).then_some(MountSource::Content(&self.content)),
            (!self.local_dir.is_empty()).then_some(MountSource::LocalDir(&self.local_dir)),
        ];
        let mut present = sources.into_iter().flatten();

        match (present.next(), present.next()) {
            (Some(source), None) => Ok(source),
            (None, _) => Err(ManifestError::EmptyMount(self.path.clone())),
            (Some(_), Some(_)) => Err(ManifestError::AmbiguousMount(self.path.clone())),
        }
    }

    /// Part of the request path not covered by the selector
    pub fn suffix<'p>(&self, request_path: &'p str) -> &'p str {
        let request = request_path.trim_start_matches('/');
        request
            .strip_prefix(self.path.trim_start_matches('/'))
            .unwrap_or(request)
    }

    /// Upstream URL for a request dispatched to the proxy target
    pub fn proxy_url(&self, request_path: &str) -> Result<Url> {
        let mut target = self.proxy.clone();
        if self.append_suffix {
            target.push_str(self.suffix(request_path));
        }
        Url::parse(&target).map_err(|source| ManifestError::InvalidProxy { target, source })
    }

    fn host_path_prefix(&self, root: &Path) -> PathBuf {
        let dir = Path::new(&self.local_dir);
        if dir.is_absolute() {
            clean(dir)
        } else {
            clean(&root.join(dir))
        }
    }

    /// File on the host answering `request_path`
    ///
    /// With `append_suffix` the unmatched suffix is joined to the directory,
    /// otherwise the rule's own path is.
    pub fn host_path(&self, root: &Path, request_path: &str) -> PathBuf {
        let relative = if self.append_suffix {
            self.suffix(request_path)
        } else {
            self.path.as_str()
        };
        clean(
            &self
                .host_path_prefix(root)
                .join(relative.trim_start_matches('/')),
        )
    }

    /// Whether `host_path` stays inside the rule's directory
    pub fn validate_host_path(&self, root: &Path, host_path: &Path) -> bool {
        clean(host_path).starts_with(self.host_path_prefix(root))
    }

    /// [`host_path`](Self::host_path) followed by the traversal check
    pub fn resolve_host_path(&self, root: &Path, request_path: &str) -> Result<PathBuf> {
        let path = self.host_path(root, request_path);
        if !self.validate_host_path(root, &path) {
            return Err(ManifestError::InvalidHostPath(path.display().to_string()));
        }
        Ok(path)
    }
}

/// Lexically normalise a path, dropping `.` and folding `..`
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Select the rule answering `path`
///
/// Leading `/` is ignored on both sides. A non-prefix rule equal to the
/// path wins immediately. Otherwise the qualifying prefix rule with the
/// longest selector is returned, comparing the selector as written (before
/// trimming); an empty prefix selector matches everything.
pub fn resolve<'a>(rules: &'a [PathRule], path: &str) -> Result<&'a PathRule> {
    let path = path.trim_start_matches('/');
    let mut best: Option<&PathRule> = None;

    for rule in rules {
        let selector = rule.path.trim_start_matches('/');
        if !rule.path_is_prefix {
            if selector == path {
                return Ok(rule);
            }
            continue;
        }

        let qualifies = selector.is_empty() || path.starts_with(selector);
        let longer = best.map_or(true, |b| rule.path.len() > b.path.len());
        if qualifies && longer {
            best = Some(rule);
        }
    }

    best.ok_or_else(|| ManifestError::NoMount(path.to_string()))
}
