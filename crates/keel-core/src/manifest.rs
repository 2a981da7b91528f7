//! Dependency manifest model (`requirements.txt` format).
//!
//! The manifest is read once per build and never mutated. keel only needs
//! enough of the format to validate it up front and report what will be
//! installed: one requirement per line, `#` comments, `\` continuations,
//! pip option lines (`-r`, `--index-url`, ...) and unnamed references
//! (VCS URLs, archive URLs, local paths) passed through as-is.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// A parsed dependency manifest, in declaration order.
#[derive(Debug, Clone)]
pub struct DependencyManifest {
    path: PathBuf,
    entries: Vec<ManifestEntry>,
    raw: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    Requirement(Requirement),
    /// A pip option line such as `--extra-index-url ...`, kept verbatim.
    Option { line: usize, text: String },
    /// An unnamed URL or local path (`git+https://...`, `./vendor/pkg`), kept verbatim.
    Reference { line: usize, text: String },
}

/// A single named package requirement.
///
/// # Examples
///
/// ```
/// use keel_core::manifest::Requirement;
///
/// let req: Requirement = "foo==1.0".parse().unwrap();
/// assert_eq!(req.name, "foo");
/// assert_eq!(req.pinned_version(), Some("1.0"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub clauses: Vec<VersionClause>,
    /// Direct reference (`name @ https://...`)
    pub url: Option<String>,
    /// Environment marker after `;`, kept verbatim
    pub marker: Option<String>,
    /// 1-based line number in the manifest (0 when parsed standalone)
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionClause {
    pub op: ConstraintOp,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Compatible,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Arbitrary,
}

impl ConstraintOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compatible => "~=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessEqual => "<=",
            Self::GreaterEqual => ">=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::Arbitrary => "===",
        }
    }
}

// Longest operators first so `===` is not read as `==`.
const OPERATORS: &[ConstraintOp] = &[
    ConstraintOp::Arbitrary,
    ConstraintOp::Compatible,
    ConstraintOp::Equal,
    ConstraintOp::NotEqual,
    ConstraintOp::LessEqual,
    ConstraintOp::GreaterEqual,
    ConstraintOp::Less,
    ConstraintOp::Greater,
];

impl DependencyManifest {
    /// Read and parse the manifest at `path`. A missing file is an error.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(crate::Error::ManifestMissing(path.to_path_buf()));
            }
            Err(e) => {
                return Err(crate::Error::ManifestRead {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        Self::parse(path, raw)
    }

    /// Parse manifest bytes. `path` is only used for error reporting.
    pub fn parse(path: &Path, raw: Vec<u8>) -> crate::Result<Self> {
        let text = std::str::from_utf8(&raw).map_err(|_| crate::Error::ManifestParse {
            path: path.to_path_buf(),
            line: 0,
            reason: "manifest is not valid UTF-8".to_owned(),
        })?;

        let mut entries = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (line, logical) in logical_lines(text) {
            let content = strip_comment(&logical).trim();
            if content.is_empty() {
                continue;
            }

            if content.starts_with('-') {
                entries.push(ManifestEntry::Option {
                    line,
                    text: content.to_owned(),
                });
                continue;
            }

            // Per-requirement options (`--hash=...`) follow the specifier.
            let spec = content.split(" --").next().unwrap_or(content).trim();

            if is_unnamed_reference(spec) {
                entries.push(ManifestEntry::Reference {
                    line,
                    text: content.to_owned(),
                });
                continue;
            }

            let mut req = parse_requirement(spec).map_err(|reason| {
                crate::Error::ManifestParse {
                    path: path.to_path_buf(),
                    line,
                    reason,
                }
            })?;
            req.line = line;

            let key = req.normalized_name();
            if let Some(&first_line) = seen.get(&key) {
                return Err(crate::Error::DuplicateRequirement {
                    path: path.to_path_buf(),
                    name: req.name,
                    line,
                    first_line,
                });
            }
            seen.insert(key, line);
            entries.push(ManifestEntry::Requirement(req));
        }

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "parsed dependency manifest"
        );

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            raw,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The exact bytes read; layer cache keys are derived from these.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.iter().filter_map(|e| match e {
            ManifestEntry::Requirement(r) => Some(r),
            ManifestEntry::Option { .. } | ManifestEntry::Reference { .. } => None,
        })
    }

    /// Look up a requirement by name (case, `-`, `_` and `.` insensitive).
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        let key = normalize_name(name);
        self.requirements().find(|r| r.normalized_name() == key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Requirement {
    /// PEP 503 normalized name.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// The version when the requirement is an exact `==` pin.
    pub fn pinned_version(&self) -> Option<&str> {
        match self.clauses.as_slice() {
            [clause] if matches!(clause.op, ConstraintOp::Equal | ConstraintOp::Arbitrary) => {
                Some(&clause.version)
            }
            _ => None,
        }
    }
}

impl std::str::FromStr for Requirement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_requirement(s.trim())
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if let Some(url) = &self.url {
            write!(f, " @ {url}")?;
        }
        let clauses: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        f.write_str(&clauses.join(","))?;
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

impl fmt::Display for VersionClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.push(c.to_ascii_lowercase());
            last_sep = false;
        }
    }
    out
}

/// Joins `\`-continued lines; yields the 1-based number of the first physical line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (idx, line) in text.lines().enumerate() {
        if current.is_empty() {
            start = idx + 1;
        }
        match line.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                out.push((start, std::mem::take(&mut current)));
            }
        }
    }
    if !current.is_empty() {
        out.push((start, current));
    }
    out
}

/// A `#` starts a comment at line start or after whitespace.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

/// Archive suffixes pip accepts as a bare requirement line.
const ARCHIVE_SUFFIXES: &[&str] = &[".whl", ".tar.gz", ".tar.bz2", ".tgz", ".zip"];

/// A URL (`scheme://...`), a local path, or an archive file name.
fn is_unnamed_reference(spec: &str) -> bool {
    let head = spec.split(';').next().unwrap_or(spec).trim_end();
    if let Some((scheme, _)) = head.split_once("://") {
        if !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return true;
        }
    }
    head.starts_with(['.', '/', '~'])
        || head.starts_with("file:")
        || (!head.contains(char::is_whitespace)
            && ARCHIVE_SUFFIXES.iter().any(|suffix| head.ends_with(suffix)))
}

/// Byte offset of the `;` that starts the environment marker.
///
/// With a direct reference the `;` must follow whitespace, since URLs may
/// contain `;` themselves.
fn marker_start(input: &str) -> Option<usize> {
    let has_url = input.split(';').next().is_some_and(|head| head.contains('@'));
    input
        .match_indices(';')
        .map(|(i, _)| i)
        .find(|&i| !has_url || input[..i].ends_with(char::is_whitespace))
}

fn parse_requirement(input: &str) -> Result<Requirement, String> {
    let split = marker_start(input).map(|i| (&input[..i], &input[i + 1..]));
    let (spec, marker) = match split {
        Some((spec, marker)) => {
            let marker = marker.trim();
            if marker.is_empty() {
                return Err("empty environment marker after ';'".to_owned());
            }
            (spec.trim(), Some(marker.to_owned()))
        }
        None => (input, None),
    };

    let name_end = spec
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(spec.len());
    let name = &spec[..name_end];
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(format!("expected a package name, found '{spec}'"));
    }
    if !name.ends_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(format!("package name '{name}' must end with a letter or digit"));
    }

    let mut rest = spec[name_end..].trim_start();

    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let close = after
            .find(']')
            .ok_or_else(|| format!("unterminated extras in '{spec}'"))?;
        for extra in after[..close].split(',') {
            let extra = extra.trim();
            if extra.is_empty() {
                continue;
            }
            if !extra
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                return Err(format!("invalid extra '{extra}'"));
            }
            extras.push(extra.to_owned());
        }
        rest = after[close + 1..].trim_start();
    }

    let mut url = None;
    let mut clauses = Vec::new();

    if let Some(reference) = rest.strip_prefix('@') {
        let reference = reference.trim();
        if reference.is_empty() || reference.contains(char::is_whitespace) {
            return Err(format!("invalid direct reference for '{name}'"));
        }
        url = Some(reference.to_owned());
    } else if !rest.is_empty() {
        let rest = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .unwrap_or(rest);
        for clause in rest.split(',') {
            clauses.push(parse_clause(clause.trim(), name)?);
        }
    }

    Ok(Requirement {
        name: name.to_owned(),
        extras,
        clauses,
        url,
        marker,
        line: 0,
    })
}

fn parse_clause(clause: &str, name: &str) -> Result<VersionClause, String> {
    let op = OPERATORS
        .iter()
        .copied()
        .find(|op| clause.starts_with(op.as_str()))
        .ok_or_else(|| format!("expected a version operator for '{name}', found '{clause}'"))?;

    let version = clause[op.as_str().len()..].trim();
    if version.is_empty() {
        return Err(format!("missing version after '{}' for '{name}'", op.as_str()));
    }
    if version.contains(char::is_whitespace) {
        return Err(format!("invalid version '{version}' for '{name}'"));
    }

    Ok(VersionClause {
        op,
        version: version.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_separator_runs() {
        assert_eq!(normalize_name("Foo__Bar.-baz"), "foo-bar-baz");
    }

    #[test]
    fn comment_requires_leading_whitespace() {
        assert_eq!(strip_comment("foo==1.0 # pinned"), "foo==1.0 ");
        assert_eq!(strip_comment("# whole line"), "");
        assert_eq!(strip_comment("pkg @ https://host/a#egg=pkg"), "pkg @ https://host/a#egg=pkg");
    }

    #[test]
    fn continuation_keeps_first_line_number() {
        let lines = logical_lines("a\nb==1 \\\n  --hash=sha256:x\nc");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].0, 2);
        assert!(lines[1].1.contains("--hash"));
        assert_eq!(lines[2].0, 4);
    }
}
