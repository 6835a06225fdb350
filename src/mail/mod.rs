pub mod address;
pub mod body;
pub mod event;
pub mod message;

pub use event::{CalendarEvent, RawCalendarEvent};
pub use message::{Message, RawMessage};
