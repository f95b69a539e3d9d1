// Driver Version Ordering
// Normalizes dotted version strings pulled out of driver names so they can be compared

/// A normalized driver version.
///
/// Trailing zero groups are dropped, so `5.0.0` and `5` compare equal, and an
/// empty or digit-less version is `[0]`. Ordering is lexicographic: `[5] < [5, 1] < [8]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriverVersion(Vec<u64>);

impl DriverVersion {
    /// Normalize a version string such as `"5.1"` or `"12.2"`
    pub fn parse(text: &str) -> Self {
        let mut parts: Vec<u64> = text
            .split('.')
            .map(|segment| {
                let digits: String = segment.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    0
                } else {
                    digits.parse().unwrap_or(u64::MAX)
                }
            })
            .collect();

        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }
        if parts.is_empty() {
            parts.push(0);
        }

        Self(parts)
    }

    /// Extract and normalize the version embedded in a driver section name.
    ///
    /// Everything that is not a digit or a dot is discarded first, so
    /// `"Oracle 12.2g"` becomes `12.2` and `"MySQL"` becomes `[0]`.
    pub fn from_section_name(name: &str) -> Self {
        let raw: String = name
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        Self::parse(&raw)
    }

    pub fn parts(&self) -> &[u64] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_zeros_are_stripped() {
        assert_eq!(DriverVersion::parse("5.0.0"), DriverVersion::parse("5"));
        assert_eq!(DriverVersion::parse("5.0.0").parts(), &[5]);
        assert_eq!(DriverVersion::parse("18.00").parts(), &[18]);
    }

    #[test]
    fn test_empty_and_zero_versions() {
        assert_eq!(DriverVersion::parse("").parts(), &[0]);
        assert_eq!(DriverVersion::parse("0").parts(), &[0]);
        assert_eq!(DriverVersion::parse("0.0").parts(), &[0]);
        assert_eq!(DriverVersion::parse(".").parts(), &[0]);
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(DriverVersion::parse("5.1") > DriverVersion::parse("5"));
        assert!(DriverVersion::parse("8") > DriverVersion::parse("5.9"));
        assert!(DriverVersion::parse("18") > DriverVersion::parse("12.2"));
        assert!(DriverVersion::parse("") < DriverVersion::parse("1"));
    }

    #[test]
    fn test_from_section_name() {
        assert_eq!(DriverVersion::from_section_name("Oracle 12.2g").parts(), &[12, 2]);
        assert_eq!(DriverVersion::from_section_name("MySQL 8 Driver").parts(), &[8]);
        assert_eq!(DriverVersion::from_section_name("FreeTDS").parts(), &[0]);
        assert_eq!(
            DriverVersion::from_section_name("ODBC Driver 17 for SQL Server").parts(),
            &[17]
        );
    }
}
