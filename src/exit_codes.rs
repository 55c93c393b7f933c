use crate::events::Terminal;

/// Process exit codes.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    /// Bad input, missing GAM, unreadable files.
    pub const OPERATIONAL_FAILURE: i32 = 1;
    /// The batch ran but at least one target failed.
    pub const PARTIAL_FAILURE: i32 = 2;
    /// The batch itself was abandoned.
    pub const FATAL: i32 = 3;
    pub const CANCELLED: i32 = 4;
}

pub fn for_terminal(terminal: &Terminal) -> i32 {
    match terminal {
        Terminal::Done { summary } if summary.failure_count == 0 => exit::SUCCESS,
        Terminal::Done { .. } => exit::PARTIAL_FAILURE,
        Terminal::Cancelled { .. } => exit::CANCELLED,
        Terminal::Error { .. } => exit::FATAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BatchSummary;

    #[test]
    fn terminal_mapping() {
        let clean = BatchSummary {
            success_count: 2,
            ..Default::default()
        };
        let partial = BatchSummary {
            success_count: 1,
            failure_count: 1,
            errors: vec![("b@x.com".into(), "nope".into())],
            cancelled: false,
        };
        assert_eq!(for_terminal(&Terminal::Done { summary: clean.clone() }), exit::SUCCESS);
        assert_eq!(for_terminal(&Terminal::Done { summary: partial }), exit::PARTIAL_FAILURE);
        assert_eq!(for_terminal(&Terminal::Cancelled { summary: clean }), exit::CANCELLED);
        assert_eq!(
            for_terminal(&Terminal::Error {
                message: "boom".into()
            }),
            exit::FATAL
        );
    }
}
