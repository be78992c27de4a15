//! Bus message handler that turns inbound events into dispatcher jobs.
//!
//! Runs on the bus delivery task, so every step is synchronous and the only
//! shared state touched is the dispatcher's submit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use q4d_bus::{InboundMessage, MessageHandler};
use q4d_core::{Event, Job, MalformedEvent, SubmitOutcome, TypeResolver, UnknownCategory};
use q4d_dispatch::Dispatcher;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why an inbound message produced no job.
#[derive(Debug, Error)]
pub enum IntakeRejection {
    /// Intake was stopped for shutdown.
    #[error("intake stopped")]
    Stopped,
    /// The payload was not a valid event.
    #[error("malformed event")]
    Malformed {
        /// Decode failure.
        #[from]
        source: MalformedEvent,
    },
    /// No destination for the category.
    #[error("unknown category")]
    UnknownCategory {
        /// Lookup failure.
        #[from]
        source: UnknownCategory,
    },
}

/// Decodes, resolves and submits inbound events.
pub struct EventIntake {
    resolver: Arc<TypeResolver>,
    dispatcher: Arc<Dispatcher>,
    accepting: AtomicBool,
}

impl EventIntake {
    /// Intake feeding `dispatcher`, accepting messages until [`Self::stop`].
    #[must_use]
    pub const fn new(resolver: Arc<TypeResolver>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            resolver,
            dispatcher,
            accepting: AtomicBool::new(true),
        }
    }

    /// Refuse every later message.
    pub fn stop(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("Event intake stopped");
        }
    }

    /// Whether messages are still accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Turn one payload into a submitted job.
    ///
    /// # Errors
    ///
    /// Returns why no job was submitted. A dispatcher refusal is not an
    /// error; it is the returned [`SubmitOutcome`].
    pub fn ingest(&self, payload: &[u8]) -> Result<SubmitOutcome, IntakeRejection> {
        if !self.is_accepting() {
            return Err(IntakeRejection::Stopped);
        }
        let event = Event::decode(payload, Utc::now())?;
        let destination = self.resolver.resolve(event.category_code())?;
        let job = Job::from_event(&event, destination);
        let key = job.key().clone();
        let outcome = self.dispatcher.submit(job);
        match outcome {
            SubmitOutcome::Accepted => info!(
                job_key = %key,
                payload = event.payload_name(),
                category = event.category_code(),
                destination = %destination.display(),
                "Transfer queued"
            ),
            SubmitOutcome::DuplicateRejected => {
                info!(job_key = %key, "Transfer already in flight; ignoring duplicate event");
            }
            SubmitOutcome::QueueFull => {
                warn!(job_key = %key, payload = event.payload_name(), "Transfer queue full; event dropped");
            }
            SubmitOutcome::Closed => debug!(job_key = %key, "Dispatcher closed; event dropped"),
        }
        Ok(outcome)
    }
}

impl MessageHandler for EventIntake {
    fn on_message(&self, message: InboundMessage) {
        match self.ingest(&message.payload) {
            Ok(_) => {}
            Err(IntakeRejection::Stopped) => {
                debug!(topic = %message.topic, "Event ignored during shutdown");
            }
            Err(IntakeRejection::Malformed { source }) => warn!(
                topic = %message.topic,
                error = %source,
                payload = %String::from_utf8_lossy(&message.payload),
                "Dropping malformed event"
            ),
            Err(IntakeRejection::UnknownCategory { source }) => warn!(
                topic = %message.topic,
                category = %source.code,
                "Dropping event with unknown category"
            ),
        }
    }
}
