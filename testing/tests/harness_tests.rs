//! Tests for the shared test helpers against the in-memory repository.

#![allow(clippy::unwrap_used)] // Test code can use unwrap

use courier_core::message::{MessageKind, ProcessingStatus};
use courier_core::repository::{MessageQuery, MessageRepository};
use courier_runtime::repository::InMemoryRepository;
use courier_testing::fixtures::record;
use courier_testing::properties::{arb_kind, arb_record, arb_terminal_status};
use futures::executor::block_on;
use proptest::prelude::*;

proptest! {
    #[test]
    fn kind_and_status_filters_return_exactly_the_matching_records(
        records in prop::collection::vec(arb_record(), 0..24),
        kind in arb_kind(),
        status in arb_terminal_status(),
    ) {
        let repository = InMemoryRepository::new();
        let mut unique = Vec::new();
        for record in records {
            if block_on(repository.add(record.clone())).is_ok() {
                unique.push(record);
            }
        }

        let found = block_on(repository.query(MessageQuery::new().with_kind(kind).with_status(status))).unwrap();

        let mut expected: Vec<_> = unique
            .into_iter()
            .filter(|r| r.kind == kind && r.status == status)
            .collect();
        expected.sort_by_key(|r| r.created_at);
        prop_assert_eq!(found, expected);
    }

    #[test]
    fn paging_never_returns_more_than_requested(
        count in 0_usize..30,
        skip in 0_u64..40,
        take in 0_u64..40,
    ) {
        let repository = InMemoryRepository::new();
        for _ in 0..count {
            block_on(repository.add(record(MessageKind::Event))).unwrap();
        }

        let page = block_on(repository.query(MessageQuery::new().skip(skip).take(take))).unwrap();

        let available = (count as u64).saturating_sub(skip);
        prop_assert_eq!(page.len() as u64, available.min(take));
    }
}

#[test]
fn fixtures_are_completed_and_unique() {
    let first = record(MessageKind::Command);
    let second = record(MessageKind::Command);

    assert_ne!(first.id, second.id);
    assert_eq!(first.status, ProcessingStatus::Completed);
    assert!(!first.has_error());
}
