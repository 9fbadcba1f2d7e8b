// src/env/dotenv.rs

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use tracing::debug;

use crate::fs::FileSystem;

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\w+)\s*=\s*(.*?)\s*$").expect("static dotenv regex"))
}

/// Parse `KEY = value` lines. Lines that don't match (comments, blanks,
/// `export X=1`) are skipped; later keys override earlier ones.
pub fn parse_dotenv(text: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let Some(caps) = line_regex().captures(line) else {
            continue;
        };
        let key = caps[1].to_string();
        let value = caps[2].to_string();
        match out.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => out.push((key, value)),
        }
    }
    out
}

/// Load and parse `path`; a missing file yields no variables.
pub fn load_dotenv(fs: &dyn FileSystem, path: &Path) -> Result<Vec<(String, String)>> {
    if !fs.is_file(path) {
        debug!(path = ?path, "no dotenv file");
        return Ok(Vec::new());
    }
    let text = fs.read_to_string(path)?;
    let vars = parse_dotenv(&text);
    debug!(path = ?path, count = vars.len(), "loaded dotenv file");
    Ok(vars)
}
