use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::domain::{parse_instant, Event, EventInput, EventQuery, NewEvent};
use super::repository::EventRepository;
use crate::error::ApiError;
use crate::forms::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<EventError> for ApiError {
    fn from(value: EventError) -> Self {
        match value {
            EventError::Invalid(message) => ApiError::bad_request(message),
            EventError::NotFound(message) => ApiError::not_found(message),
            EventError::Repository(err) => {
                tracing::error!(error = %err, "event repository failure");
                ApiError::internal("Event storage is unavailable")
            }
        }
    }
}

/// Listing, lookup and editing of localized event documents.
pub struct EventCatalog {
    repository: Arc<dyn EventRepository>,
}

impl EventCatalog {
    pub fn new(repository: Arc<dyn EventRepository>) -> Self {
        Self { repository }
    }

    /// Published events of one locale, ordered by start time.
    pub fn find(&self, query: &EventQuery) -> Result<Vec<Event>, EventError> {
        self.find_at(query, Utc::now())
    }

    pub fn find_at(&self, query: &EventQuery, now: DateTime<Utc>) -> Result<Vec<Event>, EventError> {
        let from = optional_instant(query.date_from.as_deref(), "date_from")?;
        let to = optional_instant(query.date_to.as_deref(), "date_to")?;
        let upcoming = query.upcoming();

        let mut events: Vec<Event> = self
            .repository
            .list(query.locale())?
            .into_iter()
            .filter(|event| event.published)
            .filter(|event| from.map_or(true, |from| event.start_at >= from))
            .filter(|event| to.map_or(true, |to| event.end_at <= to))
            .filter(|event| !upcoming || event.end_at >= now)
            .collect();
        events.sort_by(|a, b| a.start_at.cmp(&b.start_at).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Resolves `key` as a document id, then a numeric id, then a slug.
    pub fn find_one(
        &self,
        key: &str,
        locale: &str,
        include_unpublished: bool,
    ) -> Result<Event, EventError> {
        self.resolve(key, locale)?
            .filter(|event| include_unpublished || event.published)
            .ok_or_else(|| EventError::NotFound("Event not found".to_string()))
    }

    fn resolve(&self, key: &str, locale: &str) -> Result<Option<Event>, EventError> {
        if let Some(event) = self.repository.find_document(key, locale)? {
            return Ok(Some(event));
        }
        let fallback = match key.parse::<u64>() {
            Ok(id) => self
                .repository
                .find_by_id(id)?
                .filter(|event| event.locale == locale),
            Err(_) => self.repository.find_by_slug(key, locale)?,
        };
        match fallback {
            Some(event) => Ok(self.repository.find_document(&event.document_id, locale)?),
            None => Ok(None),
        }
    }

    pub fn create(&self, input: EventInput, locale: &str) -> Result<Event, EventError> {
        let (Some(title), Some(start_raw), Some(end_raw)) = (
            input.title.filter(|title| !title.trim().is_empty()),
            input.start_at,
            input.end_at,
        ) else {
            return Err(EventError::Invalid(
                "Missing required fields: title, startAt, endAt".to_string(),
            ));
        };

        let (Some(start_at), Some(end_at)) = (parse_instant(&start_raw), parse_instant(&end_raw))
        else {
            return Err(EventError::Invalid("Invalid dates".to_string()));
        };
        if end_at < start_at {
            return Err(EventError::Invalid("endAt must be after startAt".to_string()));
        }

        let document_id = input
            .document_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let created = self
            .repository
            .insert(NewEvent {
                document_id,
                locale: locale.to_string(),
                title,
                description: input.description,
                location: input.location,
                start_at,
                end_at,
                all_day: input.all_day.unwrap_or(false),
                slug: input.slug,
                published: input.published.unwrap_or(false),
                cover: input.cover,
            })
            .map_err(|err| match err {
                RepositoryError::Conflict => EventError::Invalid(format!(
                    "Event already exists in locale '{locale}'"
                )),
                other => EventError::Repository(other),
            })?;

        info!(event = created.id, document = %created.document_id, locale, "event created");
        Ok(created)
    }

    pub fn update(&self, key: &str, input: EventInput, locale: &str) -> Result<Event, EventError> {
        let mut event = self
            .resolve(key, locale)?
            .ok_or_else(|| EventError::NotFound(format!("Event not found in locale '{locale}'")))?;

        if let Some(raw) = input.start_at {
            event.start_at = parse_instant(&raw)
                .ok_or_else(|| EventError::Invalid("Invalid date format for startAt".to_string()))?;
        }
        if let Some(raw) = input.end_at {
            event.end_at = parse_instant(&raw)
                .ok_or_else(|| EventError::Invalid("Invalid date format for endAt".to_string()))?;
        }
        if event.end_at < event.start_at {
            return Err(EventError::Invalid("endAt must be after startAt".to_string()));
        }

        if let Some(title) = input.title {
            event.title = title;
        }
        if input.description.is_some() {
            event.description = input.description;
        }
        if input.location.is_some() {
            event.location = input.location;
        }
        if let Some(all_day) = input.all_day {
            event.all_day = all_day;
        }
        if input.slug.is_some() {
            event.slug = input.slug;
        }
        if input.cover.is_some() {
            event.cover = input.cover;
        }
        if let Some(published) = input.published {
            event.published = published;
        }

        Ok(self.repository.update(event)?)
    }

    /// Deletes only the `locale` variant of the document.
    pub fn delete(&self, key: &str, locale: &str) -> Result<(), EventError> {
        let event = self
            .resolve(key, locale)?
            .ok_or_else(|| EventError::NotFound(format!("Event not found in locale '{locale}'")))?;
        self.repository.delete(&event.document_id, locale)?;
        info!(document = %event.document_id, locale, "event locale variant deleted");
        Ok(())
    }
}

fn optional_instant(raw: Option<&str>, name: &str) -> Result<Option<DateTime<Utc>>, EventError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_instant(value)
            .map(Some)
            .ok_or_else(|| EventError::Invalid(format!("Invalid date for {name}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::repository::InMemoryEventRepository;
    use chrono::TimeZone;

    fn catalog() -> EventCatalog {
        EventCatalog::new(Arc::new(InMemoryEventRepository::default()))
    }

    fn input(title: &str, start: &str, end: &str, published: bool) -> EventInput {
        EventInput {
            title: Some(title.to_string()),
            start_at: Some(start.to_string()),
            end_at: Some(end.to_string()),
            published: Some(published),
            ..EventInput::default()
        }
    }

    #[test]
    fn find_filters_and_sorts_published_events() {
        let catalog = catalog();
        catalog
            .create(input("Open Day", "2025-05-10T09:00:00Z", "2025-05-10T13:00:00Z", true), "en")
            .unwrap();
        catalog
            .create(input("Orientation", "2025-04-01T09:00:00Z", "2025-04-01T12:00:00Z", true), "en")
            .unwrap();
        catalog
            .create(input("Draft", "2025-04-15T09:00:00Z", "2025-04-15T12:00:00Z", false), "en")
            .unwrap();
        catalog
            .create(input("یوم", "2025-04-20T09:00:00Z", "2025-04-20T12:00:00Z", true), "ur")
            .unwrap();

        let all = catalog
            .find_at(&EventQuery::default(), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        let titles: Vec<_> = all.iter().map(|event| event.title.as_str()).collect();
        assert_eq!(titles, vec!["Orientation", "Open Day"]);

        let upcoming = catalog
            .find_at(
                &EventQuery {
                    upcoming: Some("true".to_string()),
                    ..EventQuery::default()
                },
                Utc.with_ymd_and_hms(2025, 4, 20, 0, 0, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(upcoming.len(), 1);
        assert_eq!(upcoming[0].title, "Open Day");

        let windowed = catalog
            .find_at(
                &EventQuery {
                    date_from: Some("2025-04-01".to_string()),
                    date_to: Some("2025-04-30".to_string()),
                    ..EventQuery::default()
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].title, "Orientation");
    }

    #[test]
    fn create_rejects_missing_fields_and_inverted_ranges() {
        let catalog = catalog();
        let missing = catalog.create(EventInput::default(), "en").unwrap_err();
        assert_eq!(missing.to_string(), "Missing required fields: title, startAt, endAt");

        let bad_dates = catalog
            .create(input("x", "soon", "later", true), "en")
            .unwrap_err();
        assert_eq!(bad_dates.to_string(), "Invalid dates");

        let inverted = catalog
            .create(input("x", "2025-05-02", "2025-05-01", true), "en")
            .unwrap_err();
        assert_eq!(inverted.to_string(), "endAt must be after startAt");
    }

    #[test]
    fn find_one_resolves_document_id_numeric_id_and_slug() {
        let catalog = catalog();
        let mut open_day = input("Open Day", "2025-05-10", "2025-05-10", true);
        open_day.slug = Some("open-day".to_string());
        let created = catalog.create(open_day, "en").unwrap();

        let by_document = catalog.find_one(&created.document_id, "en", false).unwrap();
        let by_id = catalog.find_one(&created.id.to_string(), "en", false).unwrap();
        let by_slug = catalog.find_one("open-day", "en", false).unwrap();
        assert_eq!(by_document, created);
        assert_eq!(by_id, created);
        assert_eq!(by_slug, created);
        assert!(matches!(
            catalog.find_one("open-day", "ur", false),
            Err(EventError::NotFound(_))
        ));
    }

    #[test]
    fn drafts_require_include_unpublished() {
        let catalog = catalog();
        let draft = catalog
            .create(input("Draft", "2025-05-10", "2025-05-11", false), "en")
            .unwrap();
        assert!(catalog.find_one(&draft.document_id, "en", false).is_err());
        assert!(catalog.find_one(&draft.document_id, "en", true).is_ok());
    }

    #[test]
    fn locale_variants_share_a_document() {
        let catalog = catalog();
        let en = catalog
            .create(input("Open Day", "2025-05-10", "2025-05-10", true), "en")
            .unwrap();
        let mut ur = input("یوم", "2025-05-10", "2025-05-10", true);
        ur.document_id = Some(en.document_id.clone());
        let ur = catalog.create(ur, "ur").unwrap();
        assert_eq!(ur.document_id, en.document_id);

        let mut again = input("dup", "2025-05-10", "2025-05-10", true);
        again.document_id = Some(en.document_id.clone());
        assert!(matches!(catalog.create(again, "ur"), Err(EventError::Invalid(_))));

        catalog.delete(&en.document_id, "ur").unwrap();
        assert!(catalog.find_one(&en.document_id, "en", false).is_ok());
        assert!(catalog.find_one(&en.document_id, "ur", false).is_err());
    }

    #[test]
    fn update_is_partial_and_checks_dates() {
        let catalog = catalog();
        let created = catalog
            .create(input("Open Day", "2025-05-10T09:00:00Z", "2025-05-10T13:00:00Z", true), "en")
            .unwrap();

        let updated = catalog
            .update(
                &created.document_id,
                EventInput {
                    location: Some("Main Hall".to_string()),
                    ..EventInput::default()
                },
                "en",
            )
            .unwrap();
        assert_eq!(updated.title, "Open Day");
        assert_eq!(updated.location.as_deref(), Some("Main Hall"));

        let err = catalog
            .update(
                &created.document_id,
                EventInput {
                    end_at: Some("2025-05-09".to_string()),
                    ..EventInput::default()
                },
                "en",
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "endAt must be after startAt");

        assert!(matches!(
            catalog.update(&created.document_id, EventInput::default(), "ur"),
            Err(EventError::NotFound(_))
        ));
    }
}
