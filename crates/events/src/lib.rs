//! Domain events and their publication envelope.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;

pub use bus::EventBus;
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
