//! Read-then-write transactions
//!
//! A transaction body reads documents through `Transaction::get` and queues
//! writes with `Transaction::update`. The store commits the queued writes
//! only if none of the documents read have changed in the meantime;
//! otherwise the body runs again from scratch.
//!
//! All reads must happen before the first write.

use std::collections::HashMap;

use super::document::{validate_document_path, Document, FieldOp};
use super::error::{StoreError, StoreResult};

/// Maximum number of times a transaction body runs
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// Transaction body, run once per attempt. It may borrow from the caller.
pub type TransactionFn<'a> = dyn Fn(&mut Transaction<'_>) -> StoreResult<()> + Send + Sync + 'a;

/// Snapshot reads for a transaction
pub trait TransactionSource {
    fn read(&self, path: &str) -> StoreResult<Option<Document>>;
}

/// State of one transaction attempt
pub struct Transaction<'a> {
    source: &'a dyn TransactionSource,
    /// Version seen per path, `None` when the document was absent
    reads: HashMap<String, Option<u64>>,
    writes: Vec<(String, Vec<FieldOp>)>,
}

impl<'a> Transaction<'a> {
    pub fn new(source: &'a dyn TransactionSource) -> Self {
        Self {
            source,
            reads: HashMap::new(),
            writes: Vec::new(),
        }
    }

    /// Read a document and record its version
    pub fn get(&mut self, path: &str) -> StoreResult<Option<Document>> {
        validate_document_path(path)?;
        if !self.writes.is_empty() {
            return Err(StoreError::Validation(
                "transaction reads must come before writes".to_string(),
            ));
        }

        let doc = self.source.read(path)?;
        self.reads
            .insert(path.to_string(), doc.as_ref().map(|d| d.version));
        Ok(doc)
    }

    /// Queue field ops against an existing document
    pub fn update(&mut self, path: &str, ops: Vec<FieldOp>) -> StoreResult<()> {
        validate_document_path(path)?;
        self.writes.push((path.to_string(), ops));
        Ok(())
    }

    pub fn has_writes(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Recorded reads and queued writes
    pub fn into_parts(self) -> (HashMap<String, Option<u64>>, Vec<(String, Vec<FieldOp>)>) {
        (self.reads, self.writes)
    }
}
