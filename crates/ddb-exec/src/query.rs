/// First-keyword classification of a SQL statement. Anything deeper than
/// the leading keyword is deliberately out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Truncate,
    Unknown,
}

impl QueryKind {
    pub fn classify(sql: &str) -> Self {
        let upper = sql.trim_start().to_ascii_uppercase();
        for (prefix, kind) in [
            ("SELECT", QueryKind::Select),
            ("INSERT", QueryKind::Insert),
            ("UPDATE", QueryKind::Update),
            ("DELETE", QueryKind::Delete),
            ("CREATE", QueryKind::Create),
            ("DROP", QueryKind::Drop),
            ("ALTER", QueryKind::Alter),
            ("TRUNCATE", QueryKind::Truncate),
        ] {
            if upper.starts_with(prefix) {
                return kind;
            }
        }
        QueryKind::Unknown
    }

    pub fn is_read(self) -> bool {
        self == QueryKind::Select
    }

    pub fn is_write(self) -> bool {
        !matches!(self, QueryKind::Select | QueryKind::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Select => "SELECT",
            QueryKind::Insert => "INSERT",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
            QueryKind::Create => "CREATE",
            QueryKind::Drop => "DROP",
            QueryKind::Alter => "ALTER",
            QueryKind::Truncate => "TRUNCATE",
            QueryKind::Unknown => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(QueryKind::classify("select * from t"), QueryKind::Select);
        assert_eq!(QueryKind::classify("  InSeRt INTO t"), QueryKind::Insert);
        assert_eq!(QueryKind::classify("TRUNCATE t"), QueryKind::Truncate);
        assert_eq!(QueryKind::classify("EXPLAIN SELECT 1"), QueryKind::Unknown);
    }

    #[test]
    fn read_write_split() {
        assert!(QueryKind::Select.is_read());
        assert!(!QueryKind::Select.is_write());
        for kind in [
            QueryKind::Insert,
            QueryKind::Update,
            QueryKind::Delete,
            QueryKind::Create,
            QueryKind::Drop,
            QueryKind::Alter,
            QueryKind::Truncate,
        ] {
            assert!(kind.is_write(), "{kind:?} should be a write");
            assert!(!kind.is_read());
        }
        assert!(!QueryKind::Unknown.is_write());
        assert!(!QueryKind::Unknown.is_read());
    }
}
