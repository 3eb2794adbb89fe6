// src/core/channel/response.rs

//! Response selection (§4.8 "Response selection"): which connector-message
//! the source reports back to the caller of `dispatchRawMessage`, and the
//! canned acknowledgement produced when nothing more specific is configured.

use crate::core::connector::ProcessingOutcome;
use crate::core::store::model::ConnectorStatus;

/// How a channel picks which connector-message's outcome becomes the
/// overall response to `dispatchRawMessage`.
#[derive(Debug, Clone)]
pub enum ResponseSelector {
    /// Report the source's own filter/transform status (no destination
    /// participates in the response).
    SourceStatus,
    /// Report a specific destination's outcome, by its configured name.
    Destination(String),
    /// The first destination (in configured order) to reach a terminal status.
    First,
    /// The last destination (in configured order) to reach a terminal status.
    Last,
    /// Any destination ending in ERROR wins over every other outcome,
    /// otherwise falls back to `First`.
    ErrorBiased,
}

/// One destination's named, terminal outcome, as tracked by the channel
/// runtime while a message is in flight.
#[derive(Debug, Clone)]
pub struct DestinationOutcome {
    pub name: String,
    pub status: ConnectorStatus,
    pub order: usize,
}

impl ResponseSelector {
    /// Picks the winning outcome among terminal destination outcomes. The
    /// caller guarantees `outcomes` is already filtered to terminal statuses
    /// per `ConnectorStatus::is_terminal`.
    pub fn select<'a>(&self, outcomes: &'a [DestinationOutcome]) -> Option<&'a DestinationOutcome> {
        match self {
            ResponseSelector::SourceStatus => None,
            ResponseSelector::Destination(name) => outcomes.iter().find(|o| &o.name == name),
            ResponseSelector::First => outcomes.iter().min_by_key(|o| o.order),
            ResponseSelector::Last => outcomes.iter().max_by_key(|o| o.order),
            ResponseSelector::ErrorBiased => outcomes
                .iter()
                .find(|o| o.status == ConnectorStatus::Error)
                .or_else(|| outcomes.iter().min_by_key(|o| o.order)),
        }
    }
}

/// Maps a final processing outcome to the synthetic acknowledgement code an
/// auto-responder should emit absent a configured response transformer
/// (§4.8, e.g. HL7 AA/AE/AR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAckCode {
    /// Application Accept: the message was processed successfully.
    Accept,
    /// Application Error: a recoverable processing failure occurred.
    Error,
    /// Application Reject: the message was filtered or otherwise refused.
    Reject,
}

pub fn auto_ack_for(outcome: ProcessingOutcome) -> AutoAckCode {
    match outcome {
        ProcessingOutcome::Sent => AutoAckCode::Accept,
        ProcessingOutcome::Error => AutoAckCode::Error,
        ProcessingOutcome::Filtered => AutoAckCode::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes() -> Vec<DestinationOutcome> {
        vec![
            DestinationOutcome {
                name: "lab".into(),
                status: ConnectorStatus::Sent,
                order: 0,
            },
            DestinationOutcome {
                name: "billing".into(),
                status: ConnectorStatus::Error,
                order: 1,
            },
        ]
    }

    #[test]
    fn first_picks_lowest_order() {
        let selected = ResponseSelector::First.select(&outcomes()).unwrap();
        assert_eq!(selected.name, "lab");
    }

    #[test]
    fn last_picks_highest_order() {
        let selected = ResponseSelector::Last.select(&outcomes()).unwrap();
        assert_eq!(selected.name, "billing");
    }

    #[test]
    fn error_biased_prefers_error_outcome() {
        let selected = ResponseSelector::ErrorBiased.select(&outcomes()).unwrap();
        assert_eq!(selected.name, "billing");
    }

    #[test]
    fn named_destination_lookup() {
        let selected = ResponseSelector::Destination("lab".into())
            .select(&outcomes())
            .unwrap();
        assert_eq!(selected.name, "lab");
    }

    #[test]
    fn source_status_never_selects_a_destination() {
        assert!(ResponseSelector::SourceStatus.select(&outcomes()).is_none());
    }

    #[test]
    fn auto_ack_mapping() {
        assert_eq!(auto_ack_for(ProcessingOutcome::Sent), AutoAckCode::Accept);
        assert_eq!(auto_ack_for(ProcessingOutcome::Error), AutoAckCode::Error);
        assert_eq!(auto_ack_for(ProcessingOutcome::Filtered), AutoAckCode::Reject);
    }
}
