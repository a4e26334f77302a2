//! Lazy statement-by-statement walk over a multi-statement SQL text.

use crate::error::SqlWorkerError;

use super::session::DatabaseSession;
use super::statement::StatementId;

/// Prepares one statement per [`advance`](StatementIterator::advance).
///
/// Each advance finalizes the statement handed out by the previous one. The walk is not
/// restartable; once a statement fails to compile the iterator stops and
/// [`remaining_sql`](StatementIterator::remaining_sql) returns the text from that statement
/// on.
///
/// ```rust
/// use sql_worker::prelude::*;
///
/// # fn main() -> Result<(), SqlWorkerError> {
/// let engine = Engine::new()?;
/// let mut db = engine.open_session(None)?;
/// let mut statements = db.iterate_statements("CREATE TABLE t(a); INSERT INTO t VALUES (1);");
/// while let Some(id) = statements.advance(&mut db)? {
///     db.step(id)?;
/// }
/// assert_eq!(statements.remaining_sql(), "");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StatementIterator {
    sql: String,
    offset: usize,
    current: Option<StatementId>,
    finished: bool,
}

impl StatementIterator {
    pub(crate) fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            offset: 0,
            current: None,
            finished: false,
        }
    }

    /// Prepare the next statement.
    ///
    /// # Errors
    ///
    /// Returns the `PrepareError` of the statement that failed to compile; the iterator is
    /// exhausted afterwards.
    pub fn advance(
        &mut self,
        session: &mut DatabaseSession,
    ) -> Result<Option<StatementId>, SqlWorkerError> {
        self.release(session);
        if self.finished {
            return Ok(None);
        }
        match session.prepare_at(&self.sql, self.offset) {
            Ok((Some(id), next)) => {
                self.offset = next;
                self.current = Some(id);
                Ok(Some(id))
            }
            Ok((None, next)) => {
                self.offset = next;
                self.finished = true;
                Ok(None)
            }
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }

    /// SQL text not yet consumed.
    #[must_use]
    pub fn remaining_sql(&self) -> &str {
        self.sql.get(self.offset..).unwrap_or_default()
    }

    /// Finalize the statement handed out last, if it is still live.
    pub fn release(&mut self, session: &mut DatabaseSession) {
        if let Some(previous) = self.current.take() {
            // already finalized by the caller is fine
            let _ = session.finalize(previous);
        }
    }
}
