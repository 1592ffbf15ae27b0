use std::fmt::{Debug, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::event::Event;
use tracing::field::{Field, Visit};
use tracing::{span, Id, Level, Metadata, Subscriber};

/// Prints every bridge event as a single stdout line, tagged with its level
/// and the module it came from.
pub struct LoopbackHostSubscriber {
    ids: AtomicUsize,
}

impl LoopbackHostSubscriber {
    pub fn new() -> Self {
        LoopbackHostSubscriber {
            ids: AtomicUsize::new(1),
        }
    }
}

impl Subscriber for LoopbackHostSubscriber {
    // The bridge narrates at debug and above; trace would drown the demo output.
    fn enabled(&self, metadata: &Metadata) -> bool {
        *metadata.level() <= Level::DEBUG
    }

    fn new_span(&self, _span: &span::Attributes) -> Id {
        let id = self.ids.fetch_add(1, Ordering::SeqCst);
        Id::from_u64(id as u64)
    }

    fn record(&self, _span: &Id, _values: &span::Record) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event) {
        let metadata = event.metadata();
        let mut line = String::new();
        event.record(&mut LineVisitor { line: &mut line });
        println!(
            "{:>5} [{}] {}",
            metadata.level().to_string(),
            metadata.target(),
            line.trim_end()
        );
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

// Collects an event's fields into one line, the message unlabelled and the
// rest as key=value pairs.
struct LineVisitor<'a> {
    line: &'a mut String,
}

impl Visit for LineVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            let _ = write!(self.line, "{:?} ", value);
        } else {
            let _ = write!(self.line, "{}={:?} ", field.name(), value);
        }
    }
}
