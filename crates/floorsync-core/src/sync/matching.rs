//! Correlates echoed changes in a batch response with the local records sent.

use std::collections::HashSet;

use crate::models::{Change, ChangeId, ChangeType};
use crate::sync::protocol::WireChange;

/// Claims batch records for response entries, each record at most once.
pub struct BatchMatcher<'a> {
    batch: &'a [Change],
    claimed: HashSet<ChangeId>,
}

impl<'a> BatchMatcher<'a> {
    pub fn new(batch: &'a [Change]) -> Self {
        Self {
            batch,
            claimed: HashSet::with_capacity(batch.len()),
        }
    }

    /// Find and claim the local record an echoed change refers to.
    ///
    /// An echoed `client_id` is authoritative. Without one, the first
    /// unclaimed record (in batch order) with the same
    /// `(change_type, model_name, object_id)` wins; a local CREATE, which has
    /// no object id yet, matches an echoed CREATE carrying the server's id.
    pub fn claim(&mut self, echo: &WireChange) -> Option<&'a Change> {
        let found = match echo.client_id {
            Some(client_id) => self
                .batch
                .iter()
                .find(|change| change.client_id == client_id && !self.claimed.contains(&change.id)),
            None => self
                .batch
                .iter()
                .find(|change| !self.claimed.contains(&change.id) && triple_matches(change, echo)),
        }?;

        self.claimed.insert(found.id);
        Some(found)
    }

    /// Records no response entry has claimed so far
    pub fn unclaimed(&self) -> impl Iterator<Item = &'a Change> + '_ {
        self.batch
            .iter()
            .filter(|change| !self.claimed.contains(&change.id))
    }
}

fn triple_matches(change: &Change, echo: &WireChange) -> bool {
    if change.change_type != echo.change_type || change.model_name().as_str() != echo.model_name {
        return false;
    }
    match (&change.object_id, &echo.object_id) {
        (None, _) if change.change_type == ChangeType::Create => true,
        (local, remote) => local == remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChangePayload, FloorPlanFields, RoomFields};
    use uuid::Uuid;

    fn change(id: i64, change_type: ChangeType, object_id: Option<&str>) -> Change {
        let payload = match change_type {
            ChangeType::Create => ChangePayload::FloorPlan(FloorPlanFields {
                name: Some("Level 3".to_string()),
                floor_number: Some(3),
            }),
            _ => ChangePayload::Room(RoomFields {
                capacity: Some(id),
                ..Default::default()
            }),
        };
        Change {
            id: ChangeId::new(id),
            client_id: Uuid::now_v7(),
            change_type,
            object_id: object_id.map(str::to_string),
            payload,
            version_at_change: 1,
            created_at: 0,
            synced: false,
        }
    }

    fn echo(change: &Change, with_client_id: bool) -> WireChange {
        let mut wire = WireChange::from_change(change).unwrap();
        if !with_client_id {
            wire.client_id = None;
        }
        wire
    }

    #[test]
    fn client_id_picks_exact_record_among_duplicates() {
        let batch = vec![
            change(1, ChangeType::Update, Some("42")),
            change(2, ChangeType::Update, Some("42")),
        ];
        let mut matcher = BatchMatcher::new(&batch);

        let claimed = matcher.claim(&echo(&batch[1], true)).unwrap();
        assert_eq!(claimed.id, ChangeId::new(2));
        assert_eq!(
            matcher.unclaimed().map(|c| c.id).collect::<Vec<_>>(),
            vec![ChangeId::new(1)]
        );
    }

    #[test]
    fn triple_fallback_claims_in_batch_order() {
        let batch = vec![
            change(1, ChangeType::Update, Some("42")),
            change(2, ChangeType::Update, Some("42")),
        ];
        let mut matcher = BatchMatcher::new(&batch);

        let first = matcher.claim(&echo(&batch[1], false)).unwrap();
        let second = matcher.claim(&echo(&batch[1], false)).unwrap();
        assert_eq!(first.id, ChangeId::new(1));
        assert_eq!(second.id, ChangeId::new(2));
        assert!(matcher.claim(&echo(&batch[1], false)).is_none());
    }

    #[test]
    fn unknown_client_id_does_not_fall_back() {
        let batch = vec![change(1, ChangeType::Update, Some("42"))];
        let mut matcher = BatchMatcher::new(&batch);

        let mut foreign = echo(&batch[0], true);
        foreign.client_id = Some(Uuid::now_v7());
        assert!(matcher.claim(&foreign).is_none());
    }

    #[test]
    fn create_matches_echo_with_server_assigned_id() {
        let batch = vec![change(1, ChangeType::Create, None)];
        let mut matcher = BatchMatcher::new(&batch);

        let mut acked = echo(&batch[0], false);
        acked.object_id = Some("17".to_string());
        assert_eq!(matcher.claim(&acked).unwrap().id, ChangeId::new(1));
    }

    #[test]
    fn different_object_does_not_match() {
        let batch = vec![change(1, ChangeType::Update, Some("42"))];
        let mut matcher = BatchMatcher::new(&batch);

        let mut other = echo(&batch[0], false);
        other.object_id = Some("43".to_string());
        assert!(matcher.claim(&other).is_none());
    }
}
