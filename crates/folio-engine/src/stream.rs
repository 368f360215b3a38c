//! Query result streams.
//!
//! A [`QueryStream`] is the lazy form of a query result: an iterator of
//! `Result<Entity>` whose error channel carries element-level failures
//! (dangling references) without aborting the remaining elements.
//! [`QueryStream::run`] is the eager coercion into an ordered list, which
//! fails on the first error element. Re-running a query re-executes it
//! against the then-current store; the stream itself is a snapshot.

use folio_core::entity::Entity;
use folio_core::error::Result;

/// A materialized result sequence with a value and an error channel.
#[derive(Debug)]
pub struct QueryStream {
    items: std::vec::IntoIter<Result<Entity>>,
}

impl QueryStream {
    pub(crate) fn new(items: Vec<Result<Entity>>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }

    /// Eagerly collects the stream, rejecting on the first error element.
    pub fn run(self) -> Result<Vec<Entity>> {
        self.collect()
    }

    /// Collects only the successful elements, discarding error elements.
    pub fn run_lossy(self) -> Vec<Entity> {
        self.filter_map(Result::ok).collect()
    }
}

impl Iterator for QueryStream {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::error::FolioError;
    use serde_json::json;

    fn entity(id: &str) -> Entity {
        Entity::from_value(json!({"id": id})).unwrap()
    }

    #[test]
    fn run_collects_in_order() {
        let stream = QueryStream::new(vec![Ok(entity("a")), Ok(entity("b"))]);
        let items = stream.run().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id(), Some("a"));
    }

    #[test]
    fn run_rejects_on_error_element() {
        let stream = QueryStream::new(vec![
            Ok(entity("a")),
            Err(FolioError::DanglingReference {
                collection: "books".into(),
                field: "authorId".into(),
                target_id: "missing".into(),
            }),
        ]);
        assert!(stream.run().is_err());
    }

    #[test]
    fn streaming_survives_error_elements() {
        let stream = QueryStream::new(vec![
            Ok(entity("a")),
            Err(FolioError::validation("x")),
            Ok(entity("b")),
        ]);
        let collected: Vec<_> = stream.collect();
        assert_eq!(collected.len(), 3);
        assert!(collected[1].is_err());
        assert_eq!(collected[2].as_ref().unwrap().id(), Some("b"));
    }

    #[test]
    fn run_lossy_drops_error_elements() {
        let stream = QueryStream::new(vec![
            Ok(entity("a")),
            Err(FolioError::validation("x")),
            Ok(entity("b")),
        ]);
        assert_eq!(stream.run_lossy().len(), 2);
    }
}
