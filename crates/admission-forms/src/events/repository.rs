use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::domain::{Event, NewEvent};
use crate::forms::repository::RepositoryError;

/// Storage for event documents and their locale variants.
pub trait EventRepository: Send + Sync {
    fn list(&self, locale: &str) -> Result<Vec<Event>, RepositoryError>;
    fn find_document(&self, document_id: &str, locale: &str) -> Result<Option<Event>, RepositoryError>;
    fn find_by_id(&self, id: u64) -> Result<Option<Event>, RepositoryError>;
    fn find_by_slug(&self, slug: &str, locale: &str) -> Result<Option<Event>, RepositoryError>;
    /// Fails with `Conflict` when the document already has a variant in that locale.
    fn insert(&self, event: NewEvent) -> Result<Event, RepositoryError>;
    fn update(&self, event: Event) -> Result<Event, RepositoryError>;
    /// Removes one locale variant. Returns whether anything was deleted.
    fn delete(&self, document_id: &str, locale: &str) -> Result<bool, RepositoryError>;
}

#[derive(Default)]
struct EventTable {
    next_id: u64,
    rows: BTreeMap<u64, Event>,
}

#[derive(Default, Clone)]
pub struct InMemoryEventRepository {
    table: Arc<RwLock<EventTable>>,
}

impl EventRepository for InMemoryEventRepository {
    fn list(&self, locale: &str) -> Result<Vec<Event>, RepositoryError> {
        Ok(self
            .table
            .read()
            .rows
            .values()
            .filter(|event| event.locale == locale)
            .cloned()
            .collect())
    }

    fn find_document(&self, document_id: &str, locale: &str) -> Result<Option<Event>, RepositoryError> {
        Ok(self
            .table
            .read()
            .rows
            .values()
            .find(|event| event.document_id == document_id && event.locale == locale)
            .cloned())
    }

    fn find_by_id(&self, id: u64) -> Result<Option<Event>, RepositoryError> {
        Ok(self.table.read().rows.get(&id).cloned())
    }

    fn find_by_slug(&self, slug: &str, locale: &str) -> Result<Option<Event>, RepositoryError> {
        Ok(self
            .table
            .read()
            .rows
            .values()
            .find(|event| event.slug.as_deref() == Some(slug) && event.locale == locale)
            .cloned())
    }

    fn insert(&self, event: NewEvent) -> Result<Event, RepositoryError> {
        let mut table = self.table.write();
        let duplicate = table
            .rows
            .values()
            .any(|row| row.document_id == event.document_id && row.locale == event.locale);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }

        table.next_id += 1;
        let stored = Event {
            id: table.next_id,
            document_id: event.document_id,
            locale: event.locale,
            title: event.title,
            description: event.description,
            location: event.location,
            start_at: event.start_at,
            end_at: event.end_at,
            all_day: event.all_day,
            slug: event.slug,
            published: event.published,
            cover: event.cover,
            updated_at: Utc::now(),
        };
        table.rows.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update(&self, mut event: Event) -> Result<Event, RepositoryError> {
        let mut table = self.table.write();
        let row = table
            .rows
            .get_mut(&event.id)
            .ok_or(RepositoryError::NotFound)?;
        event.updated_at = Utc::now();
        *row = event.clone();
        Ok(event)
    }

    fn delete(&self, document_id: &str, locale: &str) -> Result<bool, RepositoryError> {
        let mut table = self.table.write();
        let before = table.rows.len();
        table
            .rows
            .retain(|_, event| !(event.document_id == document_id && event.locale == locale));
        Ok(table.rows.len() != before)
    }
}
