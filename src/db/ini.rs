// INI Section Reader
// Reads odbcinst-style files; only section names matter to driver discovery

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Section holding fallback values, never a driver
const DEFAULT_SECTION: &str = "DEFAULT";

/// Syntax errors found while reading an INI file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IniError {
    #[error("File contains no section headers: {}, line {line}: {text:?}", .path.display())]
    MissingSectionHeader { path: PathBuf, line: usize, text: String },

    #[error("Source contains parsing errors: {}, line {line}: {text:?}", .path.display())]
    InvalidLine { path: PathBuf, line: usize, text: String },

    #[error("While reading from {} [line {line}]: section {section:?} already exists", .path.display())]
    DuplicateSection { path: PathBuf, line: usize, section: String },

    #[error("While reading from {} [line {line}]: option {option:?} in section {section:?} already exists", .path.display())]
    DuplicateOption {
        path: PathBuf,
        line: usize,
        section: String,
        option: String,
    },

    #[error("File is not valid UTF-8: {}", .path.display())]
    InvalidEncoding { path: PathBuf },
}

/// Ordered set of section names collected from one or more files
#[derive(Debug, Clone, Default)]
pub struct IniSections {
    names: Vec<String>,
}

impl IniSections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one file's contents and merge its sections.
    ///
    /// A section repeated across files is listed once; inside a single file
    /// repeated sections and options are errors.
    pub fn read_str(&mut self, source: &str, path: &Path) -> Result<(), IniError> {
        let mut seen_sections: HashSet<String> = HashSet::new();
        let mut seen_options: HashSet<String> = HashSet::new();
        let mut current: Option<String> = None;
        // Indent of the last option line, for continuation values
        let mut option_indent: Option<usize> = None;

        for (idx, raw_line) in source.lines().enumerate() {
            let line_no = idx + 1;
            let value = raw_line.trim();

            if value.is_empty() || value.starts_with('#') || value.starts_with(';') {
                continue;
            }

            let indent = raw_line.len() - raw_line.trim_start().len();
            if current.is_some() && option_indent.is_some_and(|level| indent > level) {
                continue;
            }

            if let Some(name) = section_header(value) {
                if !seen_sections.insert(name.to_string()) {
                    return Err(IniError::DuplicateSection {
                        path: path.to_path_buf(),
                        line: line_no,
                        section: name.to_string(),
                    });
                }
                if name != DEFAULT_SECTION && !self.names.iter().any(|n| n == name) {
                    self.names.push(name.to_string());
                }
                current = Some(name.to_string());
                option_indent = None;
                continue;
            }

            let Some(section) = current.as_deref() else {
                return Err(IniError::MissingSectionHeader {
                    path: path.to_path_buf(),
                    line: line_no,
                    text: raw_line.to_string(),
                });
            };

            let option = match value.find(&['=', ':'][..]) {
                Some(pos) => value[..pos].trim_end(),
                None => "",
            };
            if option.is_empty() {
                return Err(IniError::InvalidLine {
                    path: path.to_path_buf(),
                    line: line_no,
                    text: raw_line.to_string(),
                });
            }

            let option_key = format!("{}\u{0}{}", section, option.to_lowercase());
            if !seen_options.insert(option_key) {
                return Err(IniError::DuplicateOption {
                    path: path.to_path_buf(),
                    line: line_no,
                    section: section.to_string(),
                    option: option.to_lowercase(),
                });
            }
            option_indent = Some(indent);
        }

        Ok(())
    }

    /// Read raw bytes from a file, rejecting non UTF-8 content
    pub fn read_bytes(&mut self, bytes: &[u8], path: &Path) -> Result<(), IniError> {
        let source = std::str::from_utf8(bytes).map_err(|_| IniError::InvalidEncoding {
            path: path.to_path_buf(),
        })?;
        self.read_str(source, path)
    }

    /// Section names in the order they were first seen
    pub fn sections(&self) -> &[String] {
        &self.names
    }
}

/// `[name]` with the name running from the first `[` to the last `]`
fn section_header(value: &str) -> Option<&str> {
    let inner = value.strip_prefix('[')?;
    let end = inner.rfind(']')?;
    let name = &inner[..end];
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<IniSections, IniError> {
        let mut sections = IniSections::new();
        sections.read_str(source, Path::new("odbcinst.ini"))?;
        Ok(sections)
    }

    #[test]
    fn test_reads_section_names_in_order() {
        let sections = parse(
            "# installed drivers\n[MySQL 5]\nDriver=/usr/lib/libmyodbc5.so\n\n[FreeTDS]\nDriver = /usr/lib/libtdsodbc.so\n; trailing comment\n",
        )
        .unwrap();
        assert_eq!(sections.sections(), &["MySQL 5".to_string(), "FreeTDS".to_string()]);
    }

    #[test]
    fn test_section_name_spans_to_last_bracket() {
        let sections = parse("[Oracle [19] ODBC]\nkey=value\n").unwrap();
        assert_eq!(sections.sections(), &["Oracle [19] ODBC".to_string()]);
    }

    #[test]
    fn test_default_section_is_skipped() {
        let sections = parse("[DEFAULT]\nx=1\n[MySQL]\nx=2\n").unwrap();
        assert_eq!(sections.sections(), &["MySQL".to_string()]);
    }

    #[test]
    fn test_continuation_lines_are_accepted() {
        let sections = parse("[FreeTDS]\nDescription = first line\n   second line\nDriver: x\n").unwrap();
        assert_eq!(sections.sections(), &["FreeTDS".to_string()]);
    }

    #[test]
    fn test_text_without_header_is_an_error() {
        let err = parse("this is not valid ini format").unwrap_err();
        assert!(matches!(err, IniError::MissingSectionHeader { line: 1, .. }));
    }

    #[test]
    fn test_line_without_delimiter_is_an_error() {
        let err = parse("[MySQL]\nDriver=/x\njust some words\n").unwrap_err();
        assert!(matches!(err, IniError::InvalidLine { line: 3, .. }));
    }

    #[test]
    fn test_empty_option_name_is_an_error() {
        let err = parse("[MySQL]\n=value\n").unwrap_err();
        assert!(matches!(err, IniError::InvalidLine { line: 2, .. }));
    }

    #[test]
    fn test_duplicates_within_one_file() {
        let err = parse("[MySQL]\n[MySQL]\n").unwrap_err();
        assert!(matches!(err, IniError::DuplicateSection { .. }));

        let err = parse("[MySQL]\nDriver=a\ndriver=b\n").unwrap_err();
        assert!(matches!(err, IniError::DuplicateOption { .. }));
    }

    #[test]
    fn test_sections_merge_across_files() {
        let mut sections = IniSections::new();
        sections.read_str("[MySQL]\n[FreeTDS]\n", Path::new("a.ini")).unwrap();
        sections.read_str("[FreeTDS]\n[Oracle 19]\n", Path::new("b.ini")).unwrap();
        assert_eq!(sections.sections().len(), 3);
    }

    #[test]
    fn test_invalid_utf8_is_an_error() {
        let mut sections = IniSections::new();
        let err = sections.read_bytes(&[b'[', 0xff, b']'], Path::new("a.ini")).unwrap_err();
        assert!(matches!(err, IniError::InvalidEncoding { .. }));
    }
}
