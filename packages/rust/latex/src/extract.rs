//! Archive-level driver: pick the LaTeX members, scan them, deduplicate.

use std::collections::HashSet;

use affilscan_shared::{AffilscanError, ArchiveContents, Result};
use tracing::debug;

use crate::commands::CommandSet;

/// File extensions treated as plain-text LaTeX source.
pub const TEXT_SOURCE_EXTENSIONS: &[&str] = &[".tex"];

pub fn is_text_source(name: &str) -> bool {
    TEXT_SOURCE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Keep only the LaTeX source members of an archive.
///
/// Fails with [`AffilscanError::NoSourceFiles`] when none are present.
pub fn select_text_sources(contents: ArchiveContents) -> Result<ArchiveContents> {
    let sources: ArchiveContents = contents
        .into_iter()
        .filter(|(name, _)| is_text_source(name))
        .collect();

    if sources.is_empty() {
        return Err(AffilscanError::NoSourceFiles);
    }
    Ok(sources)
}

/// Scan every source file with every command and return the unique blocks in
/// discovery order.
///
/// Fails with [`AffilscanError::NoInstitutions`] when nothing matched.
pub fn extract_institutions(sources: &ArchiveContents, commands: &CommandSet) -> Result<Vec<String>> {
    let mut blocks = Vec::new();
    for (name, text) in sources {
        let found = commands.find_blocks(text);
        debug!(file = %name, blocks = found.len(), "scanned source file");
        blocks.extend(found.into_iter().map(str::to_string));
    }

    if blocks.is_empty() {
        return Err(AffilscanError::NoInstitutions);
    }
    Ok(dedup_preserving_order(blocks))
}

/// Drop repeated entries, keeping the first occurrence of each.
pub fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(files: &[(&str, &str)]) -> ArchiveContents {
        files
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let input = strings(&["A", "B", "A", "C", "B"]);
        assert_eq!(dedup_preserving_order(input), strings(&["A", "B", "C"]));
    }

    #[test]
    fn dedup_is_idempotent() {
        let once = dedup_preserving_order(strings(&["x", "y", "x", "z", "z"]));
        let twice = dedup_preserving_order(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn selects_only_tex_members() {
        let all = contents(&[
            ("main.tex", "body"),
            ("figs/plot.pdf", "%PDF"),
            ("sections/intro.tex", "intro"),
            ("refs.bib", "@article"),
        ]);
        let sources = select_text_sources(all).unwrap();
        let names: Vec<&str> = sources.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["main.tex", "sections/intro.tex"]);
    }

    #[test]
    fn empty_archive_is_no_source_files() {
        let err = select_text_sources(ArchiveContents::new()).unwrap_err();
        assert!(matches!(err, AffilscanError::NoSourceFiles));

        let err = select_text_sources(contents(&[("README", "x"), ("a.sty", "y")])).unwrap_err();
        assert!(matches!(err, AffilscanError::NoSourceFiles));
    }

    #[test]
    fn no_matches_is_no_institutions() {
        let sources = contents(&[("main.tex", r"\section{Intro} no authors here")]);
        let err = extract_institutions(&sources, CommandSet::default_set()).unwrap_err();
        assert!(matches!(err, AffilscanError::NoInstitutions));
    }

    #[test]
    fn single_file_two_affiliations() {
        let sources = contents(&[("main.tex", r"\affiliation{Inria}\affiliation{MIT}")]);
        let found = extract_institutions(&sources, CommandSet::default_set()).unwrap();
        assert_eq!(found, strings(&["Inria", "MIT"]));
    }

    #[test]
    fn duplicates_across_files_collapse() {
        let sources = contents(&[
            ("main.tex", r"\affiliation{Inria}"),
            ("camera_ready.tex", r"\affiliation{Inria}"),
        ]);
        let found = extract_institutions(&sources, CommandSet::default_set()).unwrap();
        assert_eq!(found, strings(&["Inria"]));
    }

    #[test]
    fn discovery_order_is_file_then_command() {
        let sources = contents(&[
            ("a.tex", r"\author{Ada}\affiliation{Analytical Engines Ltd}"),
            ("b.tex", r"\institute{CERN}"),
        ]);
        let found = extract_institutions(&sources, CommandSet::default_set()).unwrap();
        // Command order puts `affiliation` before `author`.
        assert_eq!(found, strings(&["Analytical Engines Ltd", "Ada", "CERN"]));
    }
}
