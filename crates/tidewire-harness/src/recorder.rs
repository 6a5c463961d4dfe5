//! Observer that records every event it sees.

use std::{cell::RefCell, rc::Rc};

use tidewire_core::{Event, HandlerError, Message, Observer};

/// Records events into a shared log. Clone it before subscribing to keep a
/// handle for assertions.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Rc<RefCell<Vec<Event>>>,
    fail_on: Option<String>,
}

impl Recorder {
    /// Recorder that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject data messages named `name`, after recording them.
    pub fn failing_on(name: impl Into<String>) -> Self {
        Self { fail_on: Some(name.into()), ..Self::default() }
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Event names in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(Event::name).collect()
    }

    /// Only the data payloads.
    pub fn messages(&self) -> Vec<Message> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::Data(message) => Some(message.clone()),
                Event::Connect | Event::Disconnect => None,
            })
            .collect()
    }

    /// Number of events named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events.borrow().iter().filter(|event| event.name() == name).count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl Observer for Recorder {
    fn on_event(&mut self, event: &Event) -> Result<(), HandlerError> {
        self.events.borrow_mut().push(event.clone());

        if let (Some(fail_on), Event::Data(message)) = (&self.fail_on, event) {
            if message.name() == Some(fail_on.as_str()) {
                return Err(format!("rejected {fail_on}").into());
            }
        }
        Ok(())
    }
}
