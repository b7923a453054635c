//! Localized events: public listing and lookup plus editor endpoints.

pub mod domain;
pub mod repository;
pub mod router;
pub mod service;

pub use domain::{parse_instant, Event, EventInput, EventQuery, NewEvent};
pub use repository::{EventRepository, InMemoryEventRepository};
pub use router::event_router;
pub use service::{EventCatalog, EventError};
