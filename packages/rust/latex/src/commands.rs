//! Affiliation-bearing LaTeX commands and the patterns that locate them.
//!
//! Each command is searched in three invocation shapes, in this order:
//!
//! | Shape        | Form               | Captured argument |
//! |--------------|--------------------|-------------------|
//! | two-argument | `\cmd{a}{b}`       | `b`               |
//! | one-argument | `\cmd{a}`          | `a`               |
//! | optional     | `\cmd[opt]{a}`     | `a`               |
//!
//! Every pattern ends right after the opening brace of the captured argument;
//! [`extract_brace_block`] takes it from there.

use std::sync::LazyLock;

use regex::Regex;

use crate::brace::extract_brace_block;

/// Command names recognized out of the box.
///
/// Covers the generic conventions plus REVTeX, IEEEtran, elsarticle, JHEP,
/// llncs and the ML conference templates.
pub const DEFAULT_COMMANDS: &[&str] = &[
    "affiliation",
    "affiliations",
    "affil",
    "address",
    "institute",
    "altaffiliation",
    "institution",
    // REVTeX starred form
    "affiliation*",
    "email",
    "IEEEauthorblockA",
    "IEEEauthorblockN",
    "tnotetext",
    "inst",
    "thanks",
    "author",
    "mlsysaffiliation",
    "icmlaffiliation",
];

static DEFAULT_SET: LazyLock<CommandSet> =
    LazyLock::new(|| CommandSet::from_names(DEFAULT_COMMANDS.iter().copied()));

// ---------------------------------------------------------------------------
// CommandPatterns
// ---------------------------------------------------------------------------

/// Compiled search patterns for one command name.
#[derive(Debug, Clone)]
pub struct CommandPatterns {
    name: String,
    shapes: [Regex; 3],
}

impl CommandPatterns {
    /// Compile the three invocation shapes for `name`.
    ///
    /// The name is escaped, so `affiliation*` matches a literal star.
    pub fn new(name: &str) -> Self {
        let cmd = regex::escape(name);
        let shapes = [
            format!(r"\\{cmd}\s*\{{.*?\}}\s*\{{"),
            format!(r"\\{cmd}\s*\{{"),
            format!(r"\\{cmd}\s*\[[^\]]*\]\s*\{{"),
        ]
        .map(|pattern| Regex::new(&pattern).expect("escaped command pattern"));

        Self {
            name: name.to_string(),
            shapes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All non-empty captured blocks in `tex`, shape by shape, left to right.
    pub fn find_blocks<'t>(&self, tex: &'t str) -> Vec<&'t str> {
        let mut blocks = Vec::new();
        for shape in &self.shapes {
            for m in shape.find_iter(tex) {
                match extract_brace_block(tex, m.end()) {
                    Some(block) if !block.is_empty() => blocks.push(block),
                    Some(_) => {}
                    None => {
                        tracing::trace!(command = %self.name, at = m.start(), "unterminated block");
                    }
                }
            }
        }
        blocks
    }
}

// ---------------------------------------------------------------------------
// CommandSet
// ---------------------------------------------------------------------------

/// An ordered, extensible set of commands to scan for.
#[derive(Debug, Clone, Default)]
pub struct CommandSet {
    commands: Vec<CommandPatterns>,
}

impl CommandSet {
    /// Shared set built from [`DEFAULT_COMMANDS`].
    pub fn default_set() -> &'static CommandSet {
        &DEFAULT_SET
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .fold(Self::default(), |set, name| set.with_command(name))
    }

    /// Append a command. Names already present are ignored.
    pub fn with_command(mut self, name: &str) -> Self {
        if !self.contains(name) {
            self.commands.push(CommandPatterns::new(name));
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.iter().any(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|c| c.name())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Every block captured by any command, command by command.
    pub fn find_blocks<'t>(&self, tex: &'t str) -> Vec<&'t str> {
        self.commands
            .iter()
            .flat_map(|command| command.find_blocks(tex))
            .collect()
    }
}

/// Capture every top-level argument block of `\command` in `tex`.
pub fn extract_command_blocks(command: &str, tex: &str) -> Vec<String> {
    CommandPatterns::new(command)
        .find_blocks(tex)
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_argument_shape() {
        let tex = r"\affiliation{Inria}\affiliation{MIT}";
        assert_eq!(extract_command_blocks("affiliation", tex), vec!["Inria", "MIT"]);
    }

    #[test]
    fn two_argument_shape_captures_second() {
        let tex = r"\icmlaffiliation{eth}{ETH Zurich, Switzerland}";
        let blocks = extract_command_blocks("icmlaffiliation", tex);
        // Second argument from the two-argument shape, first from the one-argument shape.
        assert_eq!(blocks, vec!["ETH Zurich, Switzerland", "eth"]);
    }

    #[test]
    fn optional_argument_shape() {
        let tex = r"\affil[1]{Department of Physics, University of Oxford}";
        assert_eq!(
            extract_command_blocks("affil", tex),
            vec!["Department of Physics, University of Oxford"]
        );
    }

    #[test]
    fn whitespace_between_name_and_brace() {
        let tex = "\\institute \n {CERN}";
        assert_eq!(extract_command_blocks("institute", tex), vec!["CERN"]);
    }

    #[test]
    fn name_prefix_does_not_match_longer_command() {
        let tex = r"\affiliations{Stanford}";
        assert!(extract_command_blocks("affiliation", tex).is_empty());
        assert_eq!(extract_command_blocks("affiliations", tex), vec!["Stanford"]);
    }

    #[test]
    fn starred_command_is_literal() {
        let tex = r"\affiliation*{KEK}\affiliationX{nope}";
        assert_eq!(extract_command_blocks("affiliation*", tex), vec!["KEK"]);
    }

    #[test]
    fn nested_same_command() {
        let tex = r"\author{A \thanks{Work done at \author{B}}}";
        let blocks = extract_command_blocks("author", tex);
        assert_eq!(blocks[0], r"A \thanks{Work done at \author{B}}");
        assert!(blocks.contains(&"B".to_string()));
    }

    #[test]
    fn empty_and_unterminated_blocks_are_dropped() {
        let tex = r"\email{}\email{a@b.org}\email{never closed";
        assert_eq!(extract_command_blocks("email", tex), vec!["a@b.org"]);
    }

    #[test]
    fn default_set_is_extensible() {
        let base = CommandSet::default_set();
        assert_eq!(base.len(), DEFAULT_COMMANDS.len());
        assert!(base.contains("IEEEauthorblockA"));

        let extended = base.clone().with_command("orgname").with_command("orgname");
        assert_eq!(extended.len(), DEFAULT_COMMANDS.len() + 1);
        assert_eq!(
            extended.find_blocks(r"\orgname{Max Planck Institute}"),
            vec!["Max Planck Institute"]
        );
    }
}
