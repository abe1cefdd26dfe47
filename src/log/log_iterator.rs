use crate::errors::Result;
use crate::tx::recovery::log_record::LogRecord;

use super::log_manager::{LogManager, Lsn};

/// Forward iterator over log records starting at a given LSN. Stops at the
/// end of the log; an I/O or parse error ends the scan after being yielded.
pub struct LogIterator<'a> {
    log_manager: &'a LogManager,
    next_lsn: Lsn,
    failed: bool,
}

impl<'a> LogIterator<'a> {
    pub(crate) fn new(log_manager: &'a LogManager, start_lsn: Lsn) -> Self {
        Self {
            log_manager,
            next_lsn: start_lsn,
            failed: false,
        }
    }
}

impl Iterator for LogIterator<'_> {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.log_manager.read_next_record(self.next_lsn) {
            Ok(Some((record, next_lsn))) => {
                self.next_lsn = next_lsn;
                Some(Ok(record))
            }
            Ok(None) => None,
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}
