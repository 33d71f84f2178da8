use std::fmt;

/// Machine-readable error codes shared by every hourlog component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    SourceLogUnavailable,
    SourceReadFailed,
    BufferWriteFailed,
    PositionWriteFailed,
    DirectoryCreateFailed,
    BufferRenameFailed,
    ArchiveNameCollision,
    CompressionFailed,
    MergeSourceUnreadable,
    ArchiveUnreadable,
    MergeOutputFailed,
    LockContention,
    ScheduleUpdateFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::SourceLogUnavailable => "E2001",
            Self::SourceReadFailed => "E2002",
            Self::BufferWriteFailed => "E2003",
            Self::PositionWriteFailed => "E2004",
            Self::DirectoryCreateFailed => "E3001",
            Self::BufferRenameFailed => "E3002",
            Self::ArchiveNameCollision => "E3003",
            Self::CompressionFailed => "E3004",
            Self::MergeSourceUnreadable => "E4001",
            Self::ArchiveUnreadable => "E4002",
            Self::MergeOutputFailed => "E4003",
            Self::LockContention => "E5001",
            Self::ScheduleUpdateFailed => "E6001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::SourceLogUnavailable => "Source log unavailable",
            Self::SourceReadFailed => "Source log read failed",
            Self::BufferWriteFailed => "Hourly buffer write failed",
            Self::PositionWriteFailed => "Position file write failed",
            Self::DirectoryCreateFailed => "Directory creation failed",
            Self::BufferRenameFailed => "Buffer rename failed",
            Self::ArchiveNameCollision => "Archive name already taken",
            Self::CompressionFailed => "Archive compression failed",
            Self::MergeSourceUnreadable => "Archive directory unreadable",
            Self::ArchiveUnreadable => "Archive unreadable",
            Self::MergeOutputFailed => "Merged output write failed",
            Self::LockContention => "Lock contention",
            Self::ScheduleUpdateFailed => "Schedule update failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the hourlog config.toml and retry."),
            Self::SourceLogUnavailable => {
                Some("Check that [archiver].source_log exists and is readable.")
            }
            Self::SourceReadFailed => Some("Retry on the next tick; the offset was not advanced."),
            Self::BufferWriteFailed | Self::PositionWriteFailed => {
                Some("Check disk space and write permissions.")
            }
            Self::DirectoryCreateFailed => {
                Some("Check permissions on the parent of the configured directory.")
            }
            Self::BufferRenameFailed => {
                Some("Keep the buffer and archive directory on the same filesystem.")
            }
            Self::ArchiveNameCollision => {
                Some("The buffer was kept; the rollover is retried on the next hour.")
            }
            Self::CompressionFailed => {
                Some("The archive was kept uncompressed; check the compression program.")
            }
            Self::MergeSourceUnreadable => Some("Check that [merge].source_dir exists."),
            Self::ArchiveUnreadable => {
                Some("The archive was skipped; inspect it with `gzip -t`.")
            }
            Self::MergeOutputFailed => {
                Some("Check permissions on the directory of [merge].output_file.")
            }
            Self::LockContention => {
                Some("Another hourlog run holds the lock; retry after it finishes.")
            }
            Self::ScheduleUpdateFailed => Some("Check that `crontab` is installed and usable."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }

    /// Whether the condition aborts the current run.
    ///
    /// Degraded conditions are logged and the run continues.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(
            self,
            Self::ArchiveNameCollision | Self::CompressionFailed | Self::ArchiveUnreadable
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 15] = [
        ErrorCode::ConfigParseError,
        ErrorCode::SourceLogUnavailable,
        ErrorCode::SourceReadFailed,
        ErrorCode::BufferWriteFailed,
        ErrorCode::PositionWriteFailed,
        ErrorCode::DirectoryCreateFailed,
        ErrorCode::BufferRenameFailed,
        ErrorCode::ArchiveNameCollision,
        ErrorCode::CompressionFailed,
        ErrorCode::MergeSourceUnreadable,
        ErrorCode::ArchiveUnreadable,
        ErrorCode::MergeOutputFailed,
        ErrorCode::LockContention,
        ErrorCode::ScheduleUpdateFailed,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let text = code.code();
            assert_eq!(text.len(), 5);
            assert!(text.starts_with('E'));
            assert!(text.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn degraded_conditions_are_not_fatal() {
        assert!(!ErrorCode::CompressionFailed.is_fatal());
        assert!(!ErrorCode::ArchiveNameCollision.is_fatal());
        assert!(!ErrorCode::ArchiveUnreadable.is_fatal());
        assert!(ErrorCode::SourceLogUnavailable.is_fatal());
        assert!(ErrorCode::BufferRenameFailed.is_fatal());
        assert!(ErrorCode::MergeOutputFailed.is_fatal());
    }
}
