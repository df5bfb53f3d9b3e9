use crate::domain::event::{EventId, EventOutcome, PaymentEvent};
use crate::domain::permit::ApplicationStatus;
use crate::domain::state_machine::RejectReason;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Flat CSV form of a [`PaymentEvent`]. The payload snapshot is left out.
#[derive(Debug, Serialize)]
struct EventRow<'a> {
    event_id: &'a str,
    source: &'static str,
    application_id: Option<u64>,
    event_type: &'a str,
    result: &'static str,
    from_status: Option<ApplicationStatus>,
    to_status: Option<ApplicationStatus>,
    reason: Option<RejectReason>,
    processed_at: String,
}

impl<'a> From<&'a PaymentEvent> for EventRow<'a> {
    fn from(event: &'a PaymentEvent) -> Self {
        let (event_id, source) = match &event.event_id {
            EventId::Gateway(id) => (id.as_str(), "gateway"),
            EventId::Synthetic(id) => (id.as_str(), "synthetic"),
        };
        let (from_status, to_status, reason) = match &event.outcome {
            EventOutcome::Applied { from, to } => (Some(*from), Some(*to), None),
            EventOutcome::NoOp { status } => (Some(*status), Some(*status), None),
            EventOutcome::Rejected { status, reason } => (Some(*status), None, Some(*reason)),
            EventOutcome::Observed | EventOutcome::Unmatched => (None, None, None),
        };
        Self {
            event_id,
            source,
            application_id: event.application_id.map(|id| id.0),
            event_type: &event.event_type,
            result: event.outcome.label(),
            from_status,
            to_status,
            reason,
            processed_at: event.processed_at.to_rfc3339(),
        }
    }
}

/// Writes the audit trail as CSV.
pub struct EventWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes the header followed by one row per event, then flushes.
    pub fn write_events<'a, I>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a PaymentEvent>,
    {
        let mut wrote_any = false;
        for event in events {
            self.writer.serialize(EventRow::from(event))?;
            wrote_any = true;
        }
        // An empty log still gets its header.
        if !wrote_any {
            self.writer.write_record([
                "event_id",
                "source",
                "application_id",
                "event_type",
                "result",
                "from_status",
                "to_status",
                "reason",
                "processed_at",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permit::ApplicationId;
    use chrono::Utc;

    fn event(id: EventId, outcome: EventOutcome) -> PaymentEvent {
        PaymentEvent {
            event_id: id,
            application_id: Some(ApplicationId(7)),
            event_type: "payment_intent.succeeded".to_string(),
            payload: serde_json::json!({}),
            outcome,
            processed_at: Utc::now(),
        }
    }

    fn render(events: &[PaymentEvent]) -> String {
        let mut buf = Vec::new();
        EventWriter::new(&mut buf).write_events(events).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_rows() {
        let out = render(&[
            event(
                EventId::Gateway("evt_1".into()),
                EventOutcome::Applied {
                    from: ApplicationStatus::PaymentProcessing,
                    to: ApplicationStatus::PaymentReceived,
                },
            ),
            event(
                EventId::Synthetic("rcv_1".into()),
                EventOutcome::Rejected {
                    status: ApplicationStatus::PaymentFailed,
                    reason: RejectReason::ReopenWindowElapsed,
                },
            ),
        ]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "event_id,source,application_id,event_type,result,from_status,to_status,reason,processed_at"
        );
        assert!(lines[1].starts_with(
            "evt_1,gateway,7,payment_intent.succeeded,applied,PAYMENT_PROCESSING,PAYMENT_RECEIVED,,"
        ));
        assert!(lines[2].starts_with(
            "rcv_1,synthetic,7,payment_intent.succeeded,rejected,PAYMENT_FAILED,,reopen_window_elapsed,"
        ));
    }

    #[test]
    fn test_empty_log_has_header() {
        assert_eq!(
            render(&[]).trim_end(),
            "event_id,source,application_id,event_type,result,from_status,to_status,reason,processed_at"
        );
    }
}
