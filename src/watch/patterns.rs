// src/watch/patterns.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::model::{DefaultSection, SourceConfig};
use crate::fs::{FileSystem, collect_files};
use crate::types::SourceName;

/// `[default]` watch settings shared by every source.
///
/// ```toml
/// [default]
/// watch = ["src/**/*"]
/// exclude = ["**/*.tmp"]
/// use_hash = false
/// ```
#[derive(Debug, Clone, Default)]
pub struct WatchDefaults {
    pub watch: Vec<String>,
    pub exclude: Vec<String>,
    pub use_hash: bool,
}

impl WatchDefaults {
    pub fn from_section(section: &DefaultSection) -> Self {
        Self {
            watch: section.watch.clone(),
            exclude: section.exclude.clone(),
            use_hash: section.use_hash.unwrap_or(false),
        }
    }
}

/// Compiled watch/exclude globs for one source.
///
/// Patterns are relative to the source's working directory; [`matches`]
/// takes paths relative to that same directory, with forward slashes.
///
/// [`matches`]: SourceWatchProfile::matches
#[derive(Clone)]
pub struct SourceWatchProfile {
    source: SourceName,
    patterns: Vec<String>,
    watch_set: GlobSet,
    exclude_set: Option<GlobSet>,
    use_hash: bool,
}

impl fmt::Debug for SourceWatchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceWatchProfile")
            .field("source", &self.source)
            .field("patterns", &self.patterns)
            .field("use_hash", &self.use_hash)
            .finish_non_exhaustive()
    }
}

impl SourceWatchProfile {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Effective watch patterns after defaults were applied.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Only rebuild when the aggregate content hash changed.
    pub fn use_hash(&self) -> bool {
        self.use_hash
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.watch_set.is_match(rel_path) {
            return false;
        }
        match &self.exclude_set {
            Some(exclude) => !exclude.is_match(rel_path),
            None => true,
        }
    }
}

/// Compile the profile of `source`.
///
/// - `append_default_watch = true`: source list followed by the defaults.
/// - Otherwise the source list when present, else the defaults.
/// - Same for `exclude`.
///
/// If that still leaves no watch pattern, the directory holding the entry
/// file is watched. `out_dir` is always excluded.
pub fn build_profile(defaults: &WatchDefaults, source: &SourceConfig) -> Result<SourceWatchProfile> {
    let mut watch = effective_patterns(
        source.watch.as_deref(),
        &defaults.watch,
        source.append_default_watch,
    );
    if watch.is_empty() {
        watch.push(entry_dir_pattern(&source.entry));
    }

    let mut exclude = effective_patterns(
        source.exclude.as_deref(),
        &defaults.exclude,
        source.append_default_exclude,
    );
    // Build output never triggers its own rebuild.
    if let Some(out_dir) = &source.out_dir {
        exclude.push(format!("{}/**", out_dir.to_string_lossy().replace('\\', "/")));
    }

    let watch_set = build_globset(&watch)
        .with_context(|| format!("building watch globset for source {}", source.name))?;
    let exclude_set = if exclude.is_empty() {
        None
    } else {
        Some(
            build_globset(&exclude)
                .with_context(|| format!("building exclude globset for source {}", source.name))?,
        )
    };

    Ok(SourceWatchProfile {
        source: source.name.clone(),
        patterns: watch,
        watch_set,
        exclude_set,
        use_hash: source.effective_use_hash(defaults.use_hash),
    })
}

fn effective_patterns(own: Option<&[String]>, defaults: &[String], append_default: bool) -> Vec<String> {
    match (own, append_default) {
        (Some(list), true) => list.iter().chain(defaults).cloned().collect(),
        (Some(list), false) => list.to_vec(),
        (None, _) => defaults.to_vec(),
    }
}

fn entry_dir_pattern(entry: &Path) -> String {
    match entry.parent().map(|p| p.to_string_lossy().replace('\\', "/")) {
        Some(dir) if !dir.is_empty() => format!("{dir}/**/*"),
        _ => entry.to_string_lossy().replace('\\', "/"),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?);
    }
    Ok(builder.build()?)
}

/// Files under `root` that the profile watches, sorted.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    profile: &SourceWatchProfile,
) -> Result<Vec<PathBuf>> {
    let files = collect_files(fs, root)?
        .into_iter()
        .filter(|path| {
            path.strip_prefix(root)
                .map(|rel| profile.matches(&rel.to_string_lossy().replace('\\', "/")))
                .unwrap_or(false)
        })
        .collect();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    fn source(toml_body: &str) -> SourceConfig {
        toml::from_str(&format!("name = \"web\"\nentry = \"src/web/main.ts\"\n{toml_body}")).unwrap()
    }

    fn defaults() -> WatchDefaults {
        WatchDefaults {
            watch: vec!["shared/**/*.ts".to_string()],
            exclude: vec!["**/*.tmp".to_string()],
            use_hash: true,
        }
    }

    #[test]
    fn appends_defaults_only_when_asked() {
        let own = source("watch = [\"src/web/**/*.ts\"]\n");
        let p = build_profile(&defaults(), &own).unwrap();
        assert!(p.matches("src/web/app.ts"));
        assert!(!p.matches("shared/util.ts"));
        assert!(p.use_hash());

        let appended = source("watch = [\"src/web/**/*.ts\"]\nappend_default_watch = true\nuse_hash = false\n");
        let p = build_profile(&defaults(), &appended).unwrap();
        assert!(p.matches("shared/util.ts"));
        assert!(!p.matches("shared/util.tmp"));
        assert!(!p.use_hash());
    }

    #[test]
    fn falls_back_to_entry_directory() {
        let p = build_profile(&WatchDefaults::default(), &source("")).unwrap();
        assert_eq!(p.patterns(), ["src/web/**/*".to_string()]);
        assert!(p.matches("src/web/deep/view.ts"));
        assert!(!p.matches("src/api/index.ts"));

        let p = build_profile(
            &WatchDefaults::default(),
            &source("watch = [\"**/*\"]\nout_dir = \"dist/web\"\n"),
        )
        .unwrap();
        assert!(p.matches("src/web/main.ts"));
        assert!(!p.matches("dist/web/main.js"));
    }

    #[test]
    fn collects_only_matching_files() {
        let fs = MockFileSystem::new();
        fs.add_file("proj/src/web/main.ts", "a");
        fs.add_file("proj/src/web/scratch.tmp", "b");
        fs.add_file("proj/README.md", "c");

        let mut defaults = WatchDefaults::default();
        defaults.exclude.push("**/*.tmp".to_string());
        let p = build_profile(&defaults, &source("")).unwrap();

        let files = collect_matching_files(&fs, Path::new("proj"), &p).unwrap();
        assert_eq!(files, vec![PathBuf::from("proj/src/web/main.ts")]);
    }
}
