//! Storage transactions with rollback-on-drop.
//!
//! A transaction guards the driver, not the identity cache: cached
//! objects keep their in-memory state across a rollback and will look
//! newer than the restored rows. Callers who roll back are expected to
//! discard their handles.

use tracing::warn;

use crate::engine::Engine;
use crate::error::EngineResult;

/// An open storage transaction. Dropping it without
/// [`commit`](Self::commit) rolls the driver back.
#[must_use = "a transaction rolls back when dropped"]
pub struct Transaction<'a> {
    engine: &'a Engine,
    completed: bool,
}

impl Engine {
    /// Open a transaction on the underlying driver. Drivers do not nest
    /// transactions; a second open one is a driver error.
    pub fn begin_transaction(&self) -> EngineResult<Transaction<'_>> {
        self.with_driver(|d| d.begin())?;
        Ok(Transaction {
            engine: self,
            completed: false,
        })
    }
}

impl Transaction<'_> {
    /// Make the writes since [`begin_transaction`](Engine::begin_transaction)
    /// permanent.
    pub fn commit(mut self) -> EngineResult<()> {
        self.completed = true;
        self.engine.with_driver(|d| d.commit())
    }

    /// Discard the writes since the transaction opened.
    pub fn rollback(mut self) -> EngineResult<()> {
        self.completed = true;
        self.engine.with_driver(|d| d.rollback())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Err(error) = self.engine.raw_driver().rollback() {
            warn!(%error, "implicit rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testutil::{self, DOCUMENT, TITLE};
    use opal_types::Value;

    #[test]
    fn committed_writes_stay() {
        let engine = testutil::open_elevated();
        let tx = engine.begin_transaction().unwrap();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();
        tx.commit().unwrap();
        assert!(engine.raw_driver().exists(doc.borrow().id()).unwrap());
    }

    #[test]
    fn rollback_discards_writes() {
        let engine = testutil::open_elevated();
        let keeper = engine.create_instance(DOCUMENT).unwrap();
        keeper
            .borrow_mut()
            .set_value(TITLE, Some(Value::from("kept")))
            .unwrap();
        engine.add(&keeper).unwrap();

        let tx = engine.begin_transaction().unwrap();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();
        tx.rollback().unwrap();

        assert!(!engine.raw_driver().exists(doc.borrow().id()).unwrap());
        assert!(engine.raw_driver().exists(keeper.borrow().id()).unwrap());
    }

    #[test]
    fn dropping_an_open_transaction_rolls_back() {
        let engine = testutil::open_elevated();
        let doc_id;
        {
            let _tx = engine.begin_transaction().unwrap();
            let doc = engine.create_instance(DOCUMENT).unwrap();
            engine.add(&doc).unwrap();
            doc_id = doc.borrow().id();
        }
        assert!(!engine.raw_driver().exists(doc_id).unwrap());
    }
}
